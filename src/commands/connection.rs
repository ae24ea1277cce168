//! Connection commands: `PING`.

use super::registry::{Arity, CommandFlags, CommandSpec, CommandTable};
use crate::database::Db;
use crate::protocol::Reply;
use bytes::Bytes;

pub(crate) fn register(table: &mut CommandTable) {
    table.register(CommandSpec {
        name: "ping",
        arity: Arity::AtLeast(1),
        flags: CommandFlags::READONLY,
        handler: ping,
    });
}

/// PING [message]
fn ping(_db: &Db, args: &[Bytes]) -> Reply {
    match args {
        [] => Reply::pong(),
        [message] => Reply::bulk(message.clone()),
        _ => Reply::arg_num_error("ping"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Db;

    #[test]
    fn test_ping() {
        let db = Db::new(0);
        assert_eq!(ping(&db, &[]), Reply::pong());
        assert_eq!(ping(&db, &[Bytes::from("hi")]), Reply::bulk("hi"));
        assert!(ping(&db, &[Bytes::from("a"), Bytes::from("b")]).is_error());
    }
}
