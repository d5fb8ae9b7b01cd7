//! Worker side of the gearman binary protocol
//!
//! Every packet is `magic (4) | type (u32 BE) | size (u32 BE) | data`, where
//! `data` holds the arguments separated by NUL bytes. Requests carry the
//! magic `\0REQ`, responses `\0RES`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::GearmanError;

pub const REQUEST_MAGIC: [u8; 4] = *b"\0REQ";
pub const RESPONSE_MAGIC: [u8; 4] = *b"\0RES";

/// Upper bound for a packet body, anything larger is treated as garbage
pub const MAX_PACKET_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    Request,
    Response,
}

impl Magic {
    fn bytes(self) -> [u8; 4] {
        match self {
            Magic::Request => REQUEST_MAGIC,
            Magic::Response => RESPONSE_MAGIC,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    CanDo,
    PreSleep,
    Noop,
    GrabJob,
    NoJob,
    JobAssign,
    WorkComplete,
    WorkFail,
    Error,
    Other(u32),
}

impl PacketType {
    pub fn code(self) -> u32 {
        match self {
            PacketType::CanDo => 1,
            PacketType::PreSleep => 4,
            PacketType::Noop => 6,
            PacketType::GrabJob => 9,
            PacketType::NoJob => 10,
            PacketType::JobAssign => 11,
            PacketType::WorkComplete => 13,
            PacketType::WorkFail => 14,
            PacketType::Error => 19,
            PacketType::Other(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            1 => PacketType::CanDo,
            4 => PacketType::PreSleep,
            6 => PacketType::Noop,
            9 => PacketType::GrabJob,
            10 => PacketType::NoJob,
            11 => PacketType::JobAssign,
            13 => PacketType::WorkComplete,
            14 => PacketType::WorkFail,
            19 => PacketType::Error,
            other => PacketType::Other(other),
        }
    }

    /// Number of NUL separated arguments, the last one may contain NULs
    fn arg_count(self) -> usize {
        match self {
            PacketType::PreSleep | PacketType::Noop | PacketType::GrabJob | PacketType::NoJob => 0,
            PacketType::CanDo | PacketType::WorkFail | PacketType::Other(_) => 1,
            PacketType::WorkComplete | PacketType::Error => 2,
            PacketType::JobAssign => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub magic: Magic,
    pub kind: PacketType,
    pub args: Vec<Vec<u8>>,
}

impl Packet {
    pub fn request(kind: PacketType, args: Vec<Vec<u8>>) -> Self {
        Self {
            magic: Magic::Request,
            kind,
            args,
        }
    }

    pub fn response(kind: PacketType, args: Vec<Vec<u8>>) -> Self {
        Self {
            magic: Magic::Response,
            kind,
            args,
        }
    }

    pub fn can_do(function: &str) -> Self {
        Self::request(PacketType::CanDo, vec![function.as_bytes().to_vec()])
    }

    pub fn work_complete(handle: &[u8], result: &[u8]) -> Self {
        Self::request(
            PacketType::WorkComplete,
            vec![handle.to_vec(), result.to_vec()],
        )
    }

    pub fn arg(&self, index: usize) -> &[u8] {
        self.args.get(index).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn encode(&self) -> Vec<u8> {
        let data = self.args.join(&0u8);
        let mut buf = Vec::with_capacity(12 + data.len());
        buf.extend_from_slice(&self.magic.bytes());
        buf.extend_from_slice(&self.kind.code().to_be_bytes());
        buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
        buf.extend_from_slice(&data);
        buf
    }

    pub fn decode_body(magic: Magic, kind: PacketType, data: &[u8]) -> Self {
        let args = match kind.arg_count() {
            0 => Vec::new(),
            n => data.splitn(n, |b| *b == 0).map(<[u8]>::to_vec).collect(),
        };
        Self { magic, kind, args }
    }

    pub async fn read_from<R>(reader: &mut R) -> Result<Self, GearmanError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; 12];
        reader.read_exact(&mut header).await?;

        let magic = match [header[0], header[1], header[2], header[3]] {
            REQUEST_MAGIC => Magic::Request,
            RESPONSE_MAGIC => Magic::Response,
            other => {
                return Err(GearmanError::Protocol(format!("bad magic {other:?}")));
            }
        };
        let kind = PacketType::from_code(u32::from_be_bytes([
            header[4], header[5], header[6], header[7],
        ]));
        let size = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
        if size > MAX_PACKET_SIZE {
            return Err(GearmanError::Protocol(format!(
                "packet of {size} bytes exceeds limit"
            )));
        }

        let mut data = vec![0u8; size];
        reader.read_exact(&mut data).await?;

        Ok(Self::decode_body(magic, kind, &data))
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), GearmanError>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.encode()).await?;
        writer.flush().await?;
        Ok(())
    }
}
