//! String commands: `GET`, `SET`, `SETNX`, `GETSET`, `STRLEN`.

use super::registry::{Arity, CommandFlags, CommandSpec, CommandTable};
use crate::database::Db;
use crate::protocol::Reply;
use crate::storage::Entity;
use bytes::Bytes;

pub(crate) fn register(table: &mut CommandTable) {
    table.register(CommandSpec {
        name: "get",
        arity: Arity::Exact(2),
        flags: CommandFlags::READONLY,
        handler: get,
    });
    table.register(CommandSpec {
        name: "set",
        arity: Arity::Exact(3),
        flags: CommandFlags::WRITE,
        handler: set,
    });
    table.register(CommandSpec {
        name: "setnx",
        arity: Arity::Exact(3),
        flags: CommandFlags::WRITE,
        handler: setnx,
    });
    table.register(CommandSpec {
        name: "getset",
        arity: Arity::Exact(3),
        flags: CommandFlags::WRITE,
        handler: getset,
    });
    table.register(CommandSpec {
        name: "strlen",
        arity: Arity::Exact(2),
        flags: CommandFlags::READONLY,
        handler: strlen,
    });
}

fn string_reply(entity: Option<Entity>) -> Reply {
    match entity {
        Some(Entity::String(value)) => Reply::bulk(value),
        None => Reply::null_bulk(),
    }
}

/// GET key
fn get(db: &Db, args: &[Bytes]) -> Reply {
    string_reply(db.data().get(&args[0]))
}

/// SET key value
fn set(db: &Db, args: &[Bytes]) -> Reply {
    db.data()
        .put(args[0].clone(), Entity::String(args[1].clone()));
    Reply::ok()
}

/// SETNX key value
///
/// Returns 1 if the key was set, 0 if it already existed.
fn setnx(db: &Db, args: &[Bytes]) -> Reply {
    let inserted = db
        .data()
        .put_if_absent(args[0].clone(), Entity::String(args[1].clone()));
    Reply::integer(inserted as i64)
}

/// GETSET key value
///
/// Sets the new value and returns the old one (nil if the key was absent).
fn getset(db: &Db, args: &[Bytes]) -> Reply {
    string_reply(
        db.data()
            .replace(args[0].clone(), Entity::String(args[1].clone())),
    )
}

/// STRLEN key
fn strlen(db: &Db, args: &[Bytes]) -> Reply {
    match db.data().get(&args[0]) {
        Some(Entity::String(value)) => Reply::integer(value.len() as i64),
        None => Reply::integer(0),
    }
}
