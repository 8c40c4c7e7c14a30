use tokio::io::{AsyncRead, AsyncReadExt};

use super::{
    header::{Header, OpCode},
    util::{read_i32, read_i64, SyncCountReader},
};
use crate::{
    bson::RawDocumentBuf,
    bson_util,
    error::{Error, Result},
};

/// Represents an OP_REPLY, the answer a pre-OP_MSG server gives to an OP_QUERY.
#[derive(Debug)]
pub struct Reply {
    pub(crate) response_to: i32,
    pub(crate) response_flags: i32,
    pub(crate) cursor_id: i64,
    pub(crate) starting_from: i32,
    pub(crate) documents: Vec<RawDocumentBuf>,
}

impl Reply {
    /// The request id this reply answers.
    pub fn response_to(&self) -> i32 {
        self.response_to
    }

    /// The flag bits of this reply.
    pub fn response_flags(&self) -> i32 {
        self.response_flags
    }

    /// The cursor id of this reply, zero for command replies.
    pub fn cursor_id(&self) -> i64 {
        self.cursor_id
    }

    /// The position in the cursor this reply starts from.
    pub fn starting_from(&self) -> i32 {
        self.starting_from
    }

    /// The documents carried by this reply.
    pub fn documents(&self) -> &[RawDocumentBuf] {
        &self.documents
    }

    /// Consumes the reply, returning the command reply document.
    pub fn into_command_reply(self) -> Result<RawDocumentBuf> {
        self.documents
            .into_iter()
            .next()
            .ok_or_else(|| Error::invalid_response("OP_REPLY contained no documents"))
    }

    /// Reads bytes from `reader` and deserializes them into a Reply.
    pub async fn read_from<R: AsyncRead + Unpin + Send>(
        mut reader: R,
        max_message_size_bytes: i32,
    ) -> Result<Self> {
        let header = Header::read_from(&mut reader).await?;
        if header.op_code != OpCode::Reply {
            return Err(Error::invalid_response(format!(
                "Invalid op code, expected {} and got {}",
                OpCode::Reply as u32,
                header.op_code as u32
            )));
        }

        let length_remaining = header.body_length(max_message_size_bytes)?;
        let mut buf = vec![0u8; length_remaining];
        reader.read_exact(&mut buf).await?;
        let mut reader = buf.as_slice();

        let response_flags = read_i32(&mut reader)?;
        let cursor_id = read_i64(&mut reader)?;
        let starting_from = read_i32(&mut reader)?;
        let number_returned = read_i32(&mut reader)?;

        let documents_length = length_remaining.saturating_sub(4 + 8 + 4 + 4);
        let mut count_reader = SyncCountReader::new(reader);
        let mut documents = Vec::new();
        while count_reader.bytes_read() < documents_length {
            let bytes = bson_util::read_document_bytes(&mut count_reader)?;
            documents.push(RawDocumentBuf::from_bytes(bytes)?);
        }

        if usize::try_from(number_returned).ok() != Some(documents.len()) {
            return Err(Error::invalid_response(format!(
                "The server indicated that the reply would contain {} documents, but it instead \
                 contained {}",
                number_returned,
                documents.len()
            )));
        }

        Ok(Self {
            response_to: header.response_to,
            response_flags,
            cursor_id,
            starting_from,
            documents,
        })
    }
}
