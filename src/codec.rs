/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! ASCII line codec for the robot command characteristic.
//!
//! Outbound commands are passed through byte-for-byte (the caller decides
//! whether a command carries its own `\n`). Inbound notifications may split
//! or merge lines arbitrarily, so they are reassembled here.

use crate::consts::MAX_COMMAND_LENGTH;
use crate::error::RemoteError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

#[derive(Default)]
pub(crate) struct LineCodec {
    buf: Vec<u8>,
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = RemoteError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, RemoteError> {
        self.buf.extend_from_slice(buf);
        buf.advance(buf.len());

        match self.buf.iter().position(|b| *b == b'\n') {
            Some(end) => {
                let mut line: Vec<u8> = self.buf.drain(0..=end).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                Ok(Some(String::from_utf8_lossy(&line).into_owned()))
            }
            None => {
                // Check data length sanity
                if self.buf.len() > MAX_COMMAND_LENGTH {
                    let len = self.buf.len();
                    self.buf.clear();
                    return Err(RemoteError::DataTooLarge(len));
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<&str> for LineCodec {
    type Error = RemoteError;

    fn encode(&mut self, command: &str, buf: &mut BytesMut) -> Result<(), RemoteError> {
        if command.len() > MAX_COMMAND_LENGTH {
            return Err(RemoteError::DataTooLarge(command.len()));
        }

        buf.put_slice(command.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reassemble_split_notifications() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from(&b"BAT,7"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        let mut buf = BytesMut::from(&b"4\r\nOK\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("BAT,74".to_string()));
        assert_eq!(
            codec.decode(&mut BytesMut::new()).unwrap(),
            Some("OK".to_string())
        );
        assert_eq!(codec.decode(&mut BytesMut::new()).unwrap(), None);
    }

    #[test]
    fn reject_unterminated_flood() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from(&[b'x'; MAX_COMMAND_LENGTH + 1][..]);
        assert_eq!(
            codec.decode(&mut buf),
            Err(RemoteError::DataTooLarge(MAX_COMMAND_LENGTH + 1))
        );
    }

    #[test]
    fn encode_is_passthrough() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::new();
        codec.encode("M,0.50,-0.20\n", &mut buf).unwrap();
        assert_eq!(&buf[..], b"M,0.50,-0.20\n");
    }

    #[test]
    fn encode_rejects_oversized_command() {
        let mut codec = LineCodec::default();
        let command = "A".repeat(MAX_COMMAND_LENGTH + 1);
        assert_eq!(
            codec.encode(command.as_str(), &mut BytesMut::new()),
            Err(RemoteError::DataTooLarge(MAX_COMMAND_LENGTH + 1))
        );
    }

    #[test]
    fn io_errors_surface_as_remote_errors() {
        fn read_frame(codec: &mut LineCodec) -> Result<Option<String>, RemoteError> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed"))?;
            codec.decode(&mut BytesMut::new())
        }
        assert_eq!(
            read_frame(&mut LineCodec::default()),
            Err(RemoteError::IOFailure("pipe closed".to_string()))
        );
    }
}
