//! Command routing table for cluster mode.

use crate::commands::CommandTable;
use crate::protocol::Reply;

/// How a cluster node handles a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Run on this node without consulting the ring.
    Local,
    /// Send to the node owning the first key argument.
    Forward,
    /// Send to every node and merge the replies.
    Broadcast(Merge),
    /// Both key arguments must live on the same node; run there.
    SameNode,
    /// A broadcast relayed by another node: run the wrapped command on the
    /// local store without routing it again.
    PeerLocal,
}

/// Verb a node prefixes to broadcast commands it relays to peers.
pub const PEER_EXEC: &str = "peerexec";

/// How broadcast replies are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    /// Integer sum (`DEL`).
    SumIntegers,
    /// `OK` once every node said `OK` (`FLUSHDB`).
    AllOk,
    /// Concatenated key lists (`KEYS`).
    ConcatKeys,
}

/// Looks up the route for a lowercase command name.
///
/// Commands not named here are forwarded by key if the local command table
/// knows them. Anything else is unsupported in cluster mode.
pub fn route_for(name: &str, commands: &CommandTable) -> Option<Route> {
    match name {
        "ping" | "select" => Some(Route::Local),
        "get" | "set" | "setnx" | "getset" | "exists" | "type" => Some(Route::Forward),
        "del" => Some(Route::Broadcast(Merge::SumIntegers)),
        "flushdb" => Some(Route::Broadcast(Merge::AllOk)),
        "keys" => Some(Route::Broadcast(Merge::ConcatKeys)),
        "rename" | "renamenx" => Some(Route::SameNode),
        PEER_EXEC => Some(Route::PeerLocal),
        _ if commands.contains(name) => Some(Route::Forward),
        _ => None,
    }
}

/// Combines per-node replies, given in node order.
///
/// The first error reply wins over everything else.
pub fn merge_replies<I>(merge: Merge, replies: I) -> Reply
where
    I: IntoIterator<Item = Reply>,
{
    let replies: Vec<Reply> = replies.into_iter().collect();
    if let Some(err) = replies.iter().find(|reply| reply.is_error()) {
        return err.clone();
    }

    match merge {
        Merge::SumIntegers => {
            let mut total = 0i64;
            for reply in &replies {
                let Some(n) = reply.as_integer() else {
                    return unexpected_reply(reply);
                };
                total = match total.checked_add(n) {
                    Some(total) => total,
                    None => return Reply::error("ERR integer overflow merging node replies"),
                };
            }
            Reply::integer(total)
        }
        Merge::AllOk => Reply::ok(),
        Merge::ConcatKeys => {
            let mut keys = Vec::new();
            for reply in replies {
                match reply {
                    Reply::MultiBulk(mut part) => keys.append(&mut part),
                    Reply::EmptyMultiBulk => {}
                    other => return unexpected_reply(&other),
                }
            }
            if keys.is_empty() {
                Reply::EmptyMultiBulk
            } else {
                Reply::MultiBulk(keys)
            }
        }
    }
}

fn unexpected_reply(reply: &Reply) -> Reply {
    let kind = match reply {
        Reply::Status(_) => "status",
        Reply::Error(_) => "error",
        Reply::Integer(_) => "integer",
        Reply::Bulk(_) | Reply::NullBulk => "bulk",
        Reply::MultiBulk(_) | Reply::EmptyMultiBulk => "multi bulk",
        Reply::NoReply => "empty",
    };
    Reply::error(format!("ERR unexpected {} reply from node", kind))
}
