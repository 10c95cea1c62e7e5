//! Shift protocol parser.
//!
//! Byte-at-a-time scanner over the framing markers. Holds no buffers of its
//! own so every server variant can drive it with whatever I/O it has.

/// Sent once, first, on every connection.
pub const HANDSHAKE: u8 = b'*';

/// Opens a region whose bytes are transformed.
pub const FRAME_START: u8 = b'^';

/// Closes the current region.
pub const FRAME_END: u8 = b'$';

/// Position of the scanner relative to the framing markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameState {
    /// Outside any region; bytes are dropped until `^`.
    #[default]
    AwaitingMessageStart,
    /// Inside a region; bytes are shifted until `$`.
    InMessage,
}

/// Transform applied to every byte inside a region.
#[inline]
pub fn shift(byte: u8) -> u8 {
    byte.wrapping_add(1)
}

/// Advance `state` over one input byte.
///
/// Returns the byte to send back, if any. Markers are never returned, and a
/// `^` seen inside a region leaves the state unchanged.
pub fn step(state: &mut FrameState, byte: u8) -> Option<u8> {
    match (*state, byte) {
        (FrameState::AwaitingMessageStart, FRAME_START) => {
            *state = FrameState::InMessage;
            None
        }
        (FrameState::AwaitingMessageStart, _) => None,
        (FrameState::InMessage, FRAME_END) => {
            *state = FrameState::AwaitingMessageStart;
            None
        }
        (FrameState::InMessage, FRAME_START) => None,
        (FrameState::InMessage, other) => Some(shift(other)),
    }
}

/// Scan `input`, appending the transformed bytes to `output`.
///
/// Returns the number of bytes appended.
pub fn transform_into<E: Extend<u8>>(state: &mut FrameState, input: &[u8], output: &mut E) -> usize {
    let mut emitted = 0;
    output.extend(input.iter().filter_map(|&b| {
        let out = step(state, b);
        if out.is_some() {
            emitted += 1;
        }
        out
    }));
    emitted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &[u8]) -> (Vec<u8>, FrameState) {
        let mut state = FrameState::default();
        let mut out = Vec::new();
        transform_into(&mut state, input, &mut out);
        (out, state)
    }

    #[test]
    fn test_region_is_shifted() {
        let (out, state) = run(b"^abc$");
        assert_eq!(out, b"bcd");
        assert_eq!(state, FrameState::AwaitingMessageStart);
    }

    #[test]
    fn test_bytes_outside_region_dropped() {
        let (out, _) = run(b"xyz^A$tail");
        assert_eq!(out, b"B");
    }

    #[test]
    fn test_nested_markers_produce_nothing() {
        let (out, state) = run(b"^^$$");
        assert!(out.is_empty());
        assert_eq!(state, FrameState::AwaitingMessageStart);
    }

    #[test]
    fn test_unmatched_end_ignored() {
        let (out, state) = run(b"$$a$^b");
        assert_eq!(out, b"c");
        assert_eq!(state, FrameState::InMessage);
    }

    #[test]
    fn test_wrapping_shift() {
        let (out, _) = run(&[FRAME_START, 0xFF, 0x00, FRAME_END]);
        assert_eq!(out, [0x00, 0x01]);
    }

    #[test]
    fn test_region_spans_calls() {
        let mut state = FrameState::default();
        let mut out = Vec::new();
        assert_eq!(transform_into(&mut state, b"ignored^he", &mut out), 2);
        assert_eq!(state, FrameState::InMessage);
        assert_eq!(transform_into(&mut state, b"llo$x", &mut out), 3);
        assert_eq!(out, b"ifmmp");
    }

    #[test]
    fn test_step_reports_emission() {
        let mut state = FrameState::InMessage;
        assert_eq!(step(&mut state, b'z'), Some(b'{'));
        assert_eq!(step(&mut state, FRAME_END), None);
        assert_eq!(step(&mut state, b'z'), None);
    }
}
