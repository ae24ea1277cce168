//! Keyspace commands: `DEL`, `EXISTS`, `FLUSHDB`, `TYPE`, `RENAME`, `RENAMENX`, `KEYS`.

use super::registry::{Arity, CommandFlags, CommandSpec, CommandTable};
use crate::database::Db;
use crate::protocol::Reply;
use bytes::Bytes;

pub(crate) fn register(table: &mut CommandTable) {
    table.register(CommandSpec {
        name: "del",
        arity: Arity::AtLeast(2),
        flags: CommandFlags::WRITE,
        handler: del,
    });
    table.register(CommandSpec {
        name: "exists",
        arity: Arity::AtLeast(2),
        flags: CommandFlags::READONLY,
        handler: exists,
    });
    // Extra arguments are ignored
    table.register(CommandSpec {
        name: "flushdb",
        arity: Arity::AtLeast(1),
        flags: CommandFlags::WRITE,
        handler: flushdb,
    });
    table.register(CommandSpec {
        name: "type",
        arity: Arity::Exact(2),
        flags: CommandFlags::READONLY,
        handler: key_type,
    });
    table.register(CommandSpec {
        name: "rename",
        arity: Arity::Exact(3),
        flags: CommandFlags::WRITE,
        handler: rename,
    });
    table.register(CommandSpec {
        name: "renamenx",
        arity: Arity::Exact(3),
        flags: CommandFlags::WRITE,
        handler: renamenx,
    });
    table.register(CommandSpec {
        name: "keys",
        arity: Arity::Exact(2),
        flags: CommandFlags::READONLY,
        handler: keys,
    });
}

fn no_such_key() -> Reply {
    Reply::error("ERR no such key")
}

/// DEL key [key ...]
fn del(db: &Db, args: &[Bytes]) -> Reply {
    Reply::integer(db.data().remove_all(args) as i64)
}

/// EXISTS key [key ...]
///
/// A key named more than once is counted more than once.
fn exists(db: &Db, args: &[Bytes]) -> Reply {
    let count = args.iter().filter(|key| db.data().contains(key)).count();
    Reply::integer(count as i64)
}

/// FLUSHDB
fn flushdb(db: &Db, _args: &[Bytes]) -> Reply {
    db.data().clear();
    Reply::ok()
}

/// TYPE key
fn key_type(db: &Db, args: &[Bytes]) -> Reply {
    match db.data().get(&args[0]) {
        Some(entity) => Reply::status(entity.type_name()),
        None => Reply::status("none"),
    }
}

/// RENAME key newkey
fn rename(db: &Db, args: &[Bytes]) -> Reply {
    if db.data().rename(&args[0], args[1].clone()) {
        Reply::ok()
    } else {
        no_such_key()
    }
}

/// RENAMENX key newkey
///
/// Returns 1 if renamed, 0 if `newkey` already exists.
fn renamenx(db: &Db, args: &[Bytes]) -> Reply {
    match db.data().rename_if_absent(&args[0], args[1].clone()) {
        Some(renamed) => Reply::integer(renamed as i64),
        None => no_such_key(),
    }
}

/// KEYS pattern
fn keys(db: &Db, args: &[Bytes]) -> Reply {
    let keys = db.data().keys(&args[0]);
    if keys.is_empty() {
        Reply::EmptyMultiBulk
    } else {
        Reply::multi_bulk(keys)
    }
}
