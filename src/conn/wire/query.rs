use bitflags::bitflags;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{
    header::{Header, OpCode},
    next_request_id,
};
use crate::{
    bson::Document,
    bson_util,
    error::{Error, Result},
};

bitflags! {
    /// Represents the bitwise flags for an OP_QUERY.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct QueryFlags: i32 {
        /// Allows the query to be served by a secondary.
        const SECONDARY_OK      = 0b0000_0100;
        /// The server should not time out the cursor.
        const NO_CURSOR_TIMEOUT = 0b0001_0000;
    }
}

/// Represents an OP_QUERY wire protocol operation against the `$cmd` pseudo-collection, the
/// form commands take for servers that predate OP_MSG.
#[derive(Clone, Debug)]
pub struct Query {
    pub(crate) flags: QueryFlags,
    pub(crate) full_collection_name: String,
    pub(crate) num_to_skip: i32,
    pub(crate) num_to_return: i32,
    pub(crate) query: Document,
    pub(crate) request_id: Option<i32>,
}

impl Query {
    /// Creates a command query against `<db>.$cmd`.
    pub(crate) fn command(db: &str, command: Document) -> Self {
        Self {
            flags: QueryFlags::empty(),
            full_collection_name: format!("{db}.$cmd"),
            num_to_skip: 0,
            num_to_return: -1,
            query: command,
            request_id: None,
        }
    }

    /// The full name of the collection queried, always `<db>.$cmd` for commands.
    pub fn full_collection_name(&self) -> &str {
        &self.full_collection_name
    }

    /// The command document.
    pub fn query(&self) -> &Document {
        &self.query
    }

    /// The flag bits of this query.
    pub fn flags(&self) -> QueryFlags {
        self.flags
    }

    /// The request id this query was or will be sent with.
    pub fn request_id(&self) -> Option<i32> {
        self.request_id
    }

    /// Serializes the query to bytes and writes them to `writer`.
    pub async fn write_to<W: AsyncWrite + Send + Unpin>(&self, mut writer: W) -> Result<()> {
        let query_bytes = bson_util::document_bytes(&self.query)?;
        let total_length = Header::LENGTH
            + std::mem::size_of::<i32>()
            + self.full_collection_name.len()
            + 1
            + 2 * std::mem::size_of::<i32>()
            + query_bytes.len();

        let header = Header {
            length: i32::try_from(total_length).map_err(|_| {
                Error::invalid_argument(format!("message of {total_length} bytes is too large"))
            })?,
            request_id: self.request_id.unwrap_or_else(next_request_id),
            response_to: 0,
            op_code: OpCode::Query,
        };

        header.write_to(&mut writer).await?;
        writer.write_i32_le(self.flags.bits()).await?;
        writer
            .write_all(self.full_collection_name.as_bytes())
            .await?;
        // null-terminator for full_collection_name
        writer.write_u8(0).await?;
        writer.write_i32_le(self.num_to_skip).await?;
        writer.write_i32_le(self.num_to_return).await?;
        writer.write_all(&query_bytes).await?;
        writer.flush().await?;

        Ok(())
    }
}
