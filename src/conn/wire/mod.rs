mod header;
pub(crate) mod message;
mod query;
mod reply;
mod util;

pub use self::{
    message::{DocumentSequence, Message, MessageFlags},
    query::{Query, QueryFlags},
    reply::Reply,
};
pub(crate) use self::util::next_request_id;
