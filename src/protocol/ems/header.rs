/// EMS header layout.
///
/// ```text
/// EMS 1.0 : src dest type offset data.. crc
/// EMS+ FF : src dest FF   offset type_hi type_lo data.. crc
/// EMS+ F7 : src dest F7   offset [sub] FF? type_hi type_lo flag data.. crc
/// ```
///
/// For the F7/F9 family the type sits one byte further when byte 4 is not `0xFF`, and the
/// flag byte after the type is not part of the data.
use super::{
    error::FrameError,
    telegram::Telegram,
    types::{EXTENDED_MARKER_FF, EXTENDED_MARKER_MIN, ID_MASK, READ_FLAG},
};

/// Anything this short is noise.
pub const MIN_FRAME_LENGTH: usize = 5;

/// Split a complete frame (checksum included) into its header fields.
///
/// The checksum is not verified here; `checksum_valid` is left `false` for the codec to fill in.
pub fn decode_header(frame: &[u8]) -> Result<Telegram, FrameError> {
    let len = frame.len();
    if len < MIN_FRAME_LENGTH {
        return Err(FrameError::FrameTooShort { len });
    }

    let src = frame[0] & ID_MASK;
    let dest = frame[1] & ID_MASK;
    let is_read = frame[1] & READ_FLAG != 0;
    let offset = frame[3];
    let marker = frame[2];

    let (type_id, data_start, extended) = if marker < EXTENDED_MARKER_MIN {
        (marker as u16, 4, false)
    } else if marker == EXTENDED_MARKER_FF {
        (type_at(frame, 4)?, 6, true)
    } else {
        let shift = usize::from(frame[4] != EXTENDED_MARKER_FF);
        (type_at(frame, 5 + shift)?, 8 + shift, true)
    };

    // Header may reach the checksum byte but never overlap it.
    let data_end = len - 1;
    let data = frame
        .get(data_start..data_end)
        .map(<[u8]>::to_vec)
        .unwrap_or_default();

    Ok(Telegram {
        src,
        dest,
        is_read,
        type_id,
        offset,
        data,
        extended,
        checksum_valid: false,
        frame: frame.to_vec(),
    })
}

/// Read a big-endian type id at `pos`, requiring it to end before the checksum byte.
fn type_at(frame: &[u8], pos: usize) -> Result<u16, FrameError> {
    if pos + 2 > frame.len() - 1 {
        return Err(FrameError::HeaderTruncated { len: frame.len() });
    }
    Ok(u16::from_be_bytes([frame[pos], frame[pos + 1]]))
}

/// Assemble the header and payload of an outgoing request, without checksum.
///
/// Reads carry the number of bytes wanted as their only payload byte. Type ids above `0xFF`
/// use the EMS+ `0xFF` layout.
pub fn encode_header(
    own_id: u8,
    dest: u8,
    read: bool,
    type_id: u16,
    offset: u8,
    payload: &[u8],
) -> Vec<u8> {
    let dest_byte = if read { dest | READ_FLAG } else { dest & ID_MASK };
    let mut bytes = Vec::with_capacity(7 + payload.len());
    bytes.push(own_id);
    bytes.push(dest_byte);

    if type_id > 0xFF {
        let [hi, lo] = type_id.to_be_bytes();
        bytes.push(EXTENDED_MARKER_FF);
        bytes.push(offset);
        if read {
            bytes.extend_from_slice(payload);
            bytes.extend_from_slice(&[hi, lo]);
        } else {
            bytes.extend_from_slice(&[hi, lo]);
            bytes.extend_from_slice(payload);
        }
    } else {
        bytes.push(type_id as u8);
        bytes.push(offset);
        bytes.extend_from_slice(payload);
    }
    bytes
}
