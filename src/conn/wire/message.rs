use std::io::Read;

use bitflags::bitflags;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{
    header::{Header, OpCode},
    next_request_id,
    util::{read_cstring, read_i32, read_u32, read_u8, SyncCountReader},
};
use crate::{
    bson::{doc, Array, Document, RawDocumentBuf},
    bson_util,
    error::{Error, ErrorKind, Result},
};

/// Represents an OP_MSG wire protocol operation.
#[derive(Clone, Debug)]
pub struct Message {
    // OP_MSG payload type 0
    pub(crate) document_payload: RawDocumentBuf,
    // OP_MSG payload type 1
    pub(crate) document_sequences: Vec<DocumentSequence>,
    pub(crate) response_to: i32,
    pub(crate) flags: MessageFlags,
    pub(crate) checksum: Option<u32>,
    pub(crate) request_id: Option<i32>,
}

/// A named, ordered list of documents carried in a payload type 1 section.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentSequence {
    pub(crate) identifier: String,
    pub(crate) documents: Vec<RawDocumentBuf>,
}

impl DocumentSequence {
    /// The identifier of the sequence, e.g. `"documents"`.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The documents of the sequence, in order.
    pub fn documents(&self) -> &[RawDocumentBuf] {
        &self.documents
    }
}

impl Message {
    /// The payload type 0 section: the command's global arguments.
    pub fn document_payload(&self) -> &RawDocumentBuf {
        &self.document_payload
    }

    /// The payload type 1 sections.
    pub fn document_sequences(&self) -> &[DocumentSequence] {
        &self.document_sequences
    }

    /// The flag bits of this message.
    pub fn flags(&self) -> MessageFlags {
        self.flags
    }

    /// The request id this message was or will be sent with.
    pub fn request_id(&self) -> Option<i32> {
        self.request_id
    }

    /// The request id this message is a response to.
    pub fn response_to(&self) -> i32 {
        self.response_to
    }

    /// Gets this message's command as a Document, with each document sequence folded back in as
    /// an array field. If deserialization fails, returns a document containing the error.
    pub fn get_command_document(&self) -> Document {
        let mut command = match self.document_payload.to_document() {
            Ok(document) => document,
            Err(error) => return doc! { "serialization error": error.to_string() },
        };

        for document_sequence in &self.document_sequences {
            let mut documents = Array::new();
            for document in &document_sequence.documents {
                match document.to_document() {
                    Ok(document) => documents.push(document.into()),
                    Err(error) => return doc! { "serialization error": error.to_string() },
                }
            }
            command.insert(document_sequence.identifier.clone(), documents);
        }

        command
    }

    /// Reads bytes from `reader` and deserializes them into a Message.
    pub async fn read_from<T: AsyncRead + Unpin + Send>(
        mut reader: T,
        max_message_size_bytes: Option<i32>,
    ) -> Result<Self> {
        let header = Header::read_from(&mut reader).await?;
        if header.op_code != OpCode::Message {
            return Err(Error::invalid_response(format!(
                "Invalid op code, expected {} and got {}",
                OpCode::Message as u32,
                header.op_code as u32
            )));
        }

        let length_remaining = header
            .body_length(max_message_size_bytes.unwrap_or(DEFAULT_MAX_MESSAGE_SIZE_BYTES))?;
        let mut buf = vec![0u8; length_remaining];
        reader.read_exact(&mut buf).await?;

        Self::read_op_common(buf.as_slice(), length_remaining, &header)
    }

    fn read_op_common(mut reader: &[u8], length_remaining: usize, header: &Header) -> Result<Self> {
        let flags = MessageFlags::from_bits_truncate(read_u32(&mut reader)?);
        let length_remaining = length_remaining
            .checked_sub(std::mem::size_of::<u32>())
            .ok_or_else(|| Error::invalid_response("OP_MSG is missing its flag bits"))?;
        let sections_length = if flags.contains(MessageFlags::CHECKSUM_PRESENT) {
            length_remaining
                .checked_sub(std::mem::size_of::<u32>())
                .ok_or_else(|| Error::invalid_response("OP_MSG is missing its checksum"))?
        } else {
            length_remaining
        };

        let mut count_reader = SyncCountReader::new(&mut reader);
        let mut document_payload = None;
        let mut document_sequences = Vec::new();
        while count_reader.bytes_read() < sections_length {
            match MessageSection::read(&mut count_reader)? {
                MessageSection::Document(document) => {
                    if document_payload.is_some() {
                        return Err(ErrorKind::InvalidResponse {
                            message: "an OP_MSG response must contain exactly one payload type 0 \
                                      section"
                                .into(),
                        }
                        .into());
                    }
                    document_payload = Some(document);
                }
                MessageSection::Sequence(document_sequence) => {
                    document_sequences.push(document_sequence)
                }
            }
        }

        if count_reader.bytes_read() != sections_length {
            return Err(Error::invalid_response(format!(
                "The server indicated that the reply would be {} bytes long, but it instead was {}",
                header.length,
                Header::LENGTH + std::mem::size_of::<u32>() + count_reader.bytes_read(),
            )));
        }

        let checksum = if flags.contains(MessageFlags::CHECKSUM_PRESENT) {
            Some(read_u32(&mut reader)?)
        } else {
            None
        };

        Ok(Self {
            response_to: header.response_to,
            flags,
            document_payload: document_payload.ok_or_else(|| ErrorKind::InvalidResponse {
                message: "an OP_MSG response must contain exactly one payload type 0 section"
                    .into(),
            })?,
            document_sequences,
            checksum,
            request_id: Some(header.request_id),
        })
    }

    /// Serializes the Message to bytes and writes them to `writer`.
    pub async fn write_to<T: AsyncWrite + Send + Unpin>(&self, mut writer: T) -> Result<()> {
        let sections = self.get_sections_bytes()?;

        let total_length = Header::LENGTH
            + std::mem::size_of::<u32>()
            + sections.len()
            + self
                .checksum
                .as_ref()
                .map(std::mem::size_of_val)
                .unwrap_or(0);

        let header = Header {
            length: i32::try_from(total_length).map_err(|_| {
                Error::invalid_argument(format!("message of {total_length} bytes is too large"))
            })?,
            request_id: self.request_id.unwrap_or_else(next_request_id),
            response_to: self.response_to,
            op_code: OpCode::Message,
        };

        header.write_to(&mut writer).await?;
        writer.write_u32_le(self.flags.bits()).await?;
        writer.write_all(&sections).await?;

        if let Some(checksum) = self.checksum {
            writer.write_u32_le(checksum).await?;
        }

        writer.flush().await?;

        Ok(())
    }

    fn get_sections_bytes(&self) -> Result<Vec<u8>> {
        let mut sections = Vec::new();

        // Payload type 0
        sections.push(0);
        sections.extend(self.document_payload.as_bytes());

        for document_sequence in &self.document_sequences {
            // Payload type 1
            sections.push(1);

            let identifier_bytes = document_sequence.identifier.as_bytes();

            let documents_size = document_sequence
                .documents
                .iter()
                .fold(0, |running_size, document| {
                    running_size + document.as_bytes().len()
                });

            // Size bytes + identifier bytes + null-terminator byte + document bytes
            let size = 4 + identifier_bytes.len() + 1 + documents_size;
            let size = i32::try_from(size).map_err(|_| {
                Error::invalid_argument(format!(
                    "document sequence \"{}\" of {size} bytes is too large",
                    document_sequence.identifier
                ))
            })?;
            sections.extend(size.to_le_bytes());

            sections.extend(identifier_bytes);
            sections.push(0);

            for document in &document_sequence.documents {
                sections.extend(document.as_bytes());
            }
        }

        Ok(sections)
    }
}

const DEFAULT_MAX_MESSAGE_SIZE_BYTES: i32 = 48 * 1024 * 1024;

bitflags! {
    /// Represents the bitwise flags for an OP_MSG.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MessageFlags: u32 {
        /// A CRC-32C checksum follows the sections. Never set on outgoing messages.
        const CHECKSUM_PRESENT = 0b_0000_0000_0000_0000_0000_0000_0000_0001;
        /// The sender will not wait for a reply.
        const MORE_TO_COME     = 0b_0000_0000_0000_0000_0000_0000_0000_0010;
        /// The client is prepared for multiple replies to this request.
        const EXHAUST_ALLOWED  = 0b_0000_0000_0000_0001_0000_0000_0000_0000;
    }
}

/// Represents a section as defined by the OP_MSG spec.
#[derive(Debug)]
enum MessageSection {
    Document(RawDocumentBuf),
    Sequence(DocumentSequence),
}

impl MessageSection {
    /// Reads bytes from `reader` and deserializes them into a MessageSection.
    fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let payload_type = read_u8(reader)?;

        if payload_type == 0 {
            let bytes = bson_util::read_document_bytes(reader)?;
            let document = RawDocumentBuf::from_bytes(bytes)?;
            return Ok(MessageSection::Document(document));
        } else if payload_type != 1 {
            return Err(Error::invalid_response(format!(
                "invalid OP_MSG payload type: {payload_type}"
            )));
        }

        let size = read_i32(reader)?;
        let mut count_reader = SyncCountReader::new(reader);
        let identifier = read_cstring(&mut count_reader)?;

        let length_remaining = usize::try_from(size)
            .ok()
            .and_then(|size| size.checked_sub(std::mem::size_of::<i32>()))
            .ok_or_else(|| {
                Error::invalid_response(format!("invalid document sequence size: {size}"))
            })?;

        let mut documents = Vec::new();
        while length_remaining > count_reader.bytes_read() {
            let bytes = bson_util::read_document_bytes(&mut count_reader)?;
            let document = RawDocumentBuf::from_bytes(bytes)?;
            documents.push(document);
        }

        if length_remaining != count_reader.bytes_read() {
            return Err(ErrorKind::InvalidResponse {
                message: format!(
                    "The server indicated that the document sequence would be {} bytes long, but \
                     it instead was {}",
                    size,
                    std::mem::size_of::<i32>() + count_reader.bytes_read(),
                ),
            }
            .into());
        }

        Ok(MessageSection::Sequence(DocumentSequence {
            identifier,
            documents,
        }))
    }
}
