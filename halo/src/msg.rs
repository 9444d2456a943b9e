use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();
const TAG_SIZE: usize = size_of::<u32>();

/// Rank identification exchanged when a TCP peer connects.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Hello {
    pub rank: usize,
}

/// The application layer frame for the worker-to-worker wire protocol.
///
/// `Data` carries one tagged f64 payload: boundary state, gradient slices
/// and collective pieces all travel this way, distinguished by the tag.
/// The 4-byte kind and tag headers put the payload at offset 8, so an
/// 8-aligned receive buffer yields an aligned f64 view.
#[derive(Debug)]
pub enum Frame<'a> {
    Hello(Hello),
    Data { tag: u32, nums: &'a [f64] },
    Err(Cow<'a, str>),
}

impl Frame<'_> {
    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("the given buffer is too small ({size} bytes), must at least fit the header"),
        ))
    }

    fn invalid_kind_byte<T>(byte: u8) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("received an invalid kind byte {byte}"),
        ))
    }
}

impl<'a> Serialize<'a> for Frame<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Frame::Err(e) => {
                let header = (0 as Header).to_be_bytes();
                buf.extend_from_slice(&header);
                Some(e.as_bytes())
            }
            Frame::Hello(hello) => {
                let header = (1 as Header).to_be_bytes();
                buf.extend_from_slice(&header);

                // SAFETY: Serialize impl for `Hello` is derived and has no
                //         non string-key map inside.
                serde_json::to_writer(buf, &hello).unwrap();
                None
            }
            Frame::Data { tag, nums } => {
                let header = (2 as Header).to_be_bytes();
                buf.extend_from_slice(&header);
                buf.extend_from_slice(&tag.to_be_bytes());
                Some(bytemuck::cast_slice(nums))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Frame<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);

        // SAFETY: We splitted the buffer to be of size `HEADER_SIZE` just above.
        let kind = Header::from_be_bytes(kind_buf.try_into().unwrap()) as u8;

        match kind {
            0 => {
                let string = str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            1 => {
                let hello = serde_json::from_slice(rest)?;
                Ok(Self::Hello(hello))
            }
            2 => {
                if rest.len() < TAG_SIZE {
                    return Self::buf_is_too_small(buf.len());
                }

                let (tag_buf, nums_buf) = rest.split_at(TAG_SIZE);
                let tag = u32::from_be_bytes(tag_buf.try_into().unwrap());

                let nums = bytemuck::try_cast_slice(nums_buf)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;

                Ok(Self::Data { tag, nums })
            }
            byte => Self::invalid_kind_byte(byte),
        }
    }
}
