use std::io::{self, ErrorKind, Read};

use super::codec::FrameCodec;

/// Longest frame kept; anything beyond is line noise.
pub const MAX_FRAME_LENGTH: usize = 64;

/// Read one gap-delimited frame.
///
/// The reader's timeout is the frame gap: a read that times out means the line went idle.
/// Returns `Ok(None)` when nothing arrived before the first timeout.
pub fn read_ems_frame<R: Read + ?Sized>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut frame = Vec::new();
    let mut chunk = [0u8; MAX_FRAME_LENGTH];

    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                frame.extend_from_slice(&chunk[..n]);
                if frame.len() > MAX_FRAME_LENGTH {
                    log::debug!("Dropping {} bytes of noise", frame.len());
                    frame.clear();
                }
            }
            Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => break,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }

    if frame.is_empty() {
        return Ok(None);
    }
    log::trace!("Received {frame:02X?}");
    Ok(Some(frame))
}

/// Remove the NUL a UART reports for the break that ends every frame, but only when the bytes
/// before it are complete on their own (a control byte, or a frame with a valid checksum).
pub fn strip_break(mut frame: Vec<u8>, codec: &dyn FrameCodec) -> Vec<u8> {
    if frame.len() < 2 || frame.last() != Some(&0x00) {
        return frame;
    }
    let complete = {
        let rest = codec.normalize(&frame[..frame.len() - 1]);
        rest.len() == 1 || codec.decode(&rest).is_ok()
    };
    if complete {
        frame.pop();
    }
    frame
}
