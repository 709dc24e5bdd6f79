//! Signal packing at DBC-addressed bit positions
//!
//! Frames are assembled in a 64-bit scratch word and serialized to the
//! 8-byte wire image in one step. The scratch word is always built so that
//! a signal occupies a contiguous bit range; the byte-order specific part
//! is the mapping from the DBC start bit to that range and the final
//! serialization.
//!
//! Big endian (Motorola): the start bit addresses the MSB of the signal.
//! Successive bits walk towards the LSB of the current byte and continue at
//! bit 7 of the following byte. In the scratch word, wire byte `i` occupies
//! bits `63 − 8·i … 56 − 8·i`, which makes that walk contiguous.
//!
//! Little endian (Intel): the start bit addresses the LSB; successive bits
//! walk towards higher bit numbers. The scratch word equals the wire image
//! read as a little-endian integer.

use super::{Endianness, Signal};

/// Applies offset, factor and the clamp window of `signal` to a physical
/// value: `clamp(min, max, (value + offset) · factor)`. The caller casts
/// the result to the integer width the signal needs.
pub fn prepare_signal_data(value: &mut f32, signal: &Signal) {
    *value = ((*value + signal.offset) * signal.factor).clamp(signal.min, signal.max);
}

/// Lowest scratch-word bit position of a big-endian signal.
fn convert_bit_start_big_endian(bit_start: u8, bit_length: u8) -> u32 {
    let byte = u32::from(bit_start) / 8;
    let bit_in_byte = u32::from(bit_start) % 8;
    let msb_position = ((7 - byte) * 8) + bit_in_byte;
    // a field must not run past the end of the frame
    assert!(msb_position + 1 >= u32::from(bit_length));
    msb_position + 1 - u32::from(bit_length)
}

/// Places the low `bit_length` bits of `signal_data` into the scratch word
/// at the DBC-addressed position. Bits outside the field are preserved.
pub fn set_message_data_with_signal_data(
    message: &mut u64,
    bit_start: u8,
    bit_length: u8,
    signal_data: u64,
    endianness: Endianness,
) {
    assert!(bit_start < 64);
    assert!((1..=64).contains(&bit_length));
    let position = match endianness {
        Endianness::Little => u32::from(bit_start),
        Endianness::Big => convert_bit_start_big_endian(bit_start, bit_length),
    };
    if bit_length == 64 {
        *message = signal_data;
    } else {
        let mask = (1u64 << bit_length) - 1;
        *message |= (signal_data & mask) << position;
    }
}

/// Extracts the `bit_length` bits at the DBC-addressed position from the
/// scratch word. Inverse of [`set_message_data_with_signal_data`].
pub fn get_signal_data_from_message_data(
    message: u64,
    bit_start: u8,
    bit_length: u8,
    endianness: Endianness,
) -> u64 {
    assert!(bit_start < 64);
    assert!((1..=64).contains(&bit_length));
    let position = match endianness {
        Endianness::Little => u32::from(bit_start),
        Endianness::Big => convert_bit_start_big_endian(bit_start, bit_length),
    };
    if bit_length == 64 {
        message
    } else {
        let mask = (1u64 << bit_length) - 1;
        (message >> position) & mask
    }
}

/// Serializes the scratch word into the wire byte order.
pub fn set_can_data_with_message_data(message: u64, data: &mut [u8; 8], endianness: Endianness) {
    *data = match endianness {
        Endianness::Big => message.to_be_bytes(),
        Endianness::Little => message.to_le_bytes(),
    };
}

/// Deserializes an 8-byte wire image back into a scratch word.
pub fn get_message_data_from_can_data(data: &[u8; 8], endianness: Endianness) -> u64 {
    match endianness {
        Endianness::Big => u64::from_be_bytes(*data),
        Endianness::Little => u64::from_le_bytes(*data),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn big_endian_field_crossing_byte_boundary() {
        // maximum cell voltage 3000 mV at DBC position (7, 13)
        let mut message = 0u64;
        set_message_data_with_signal_data(&mut message, 7, 13, 3000, Endianness::Big);
        let mut data = [0u8; 8];
        set_can_data_with_message_data(message, &mut data, Endianness::Big);
        assert_eq!(data[0], 0x5D);
        assert_eq!(data[1], 0xC0);
        assert_eq!(&data[2..], &[0; 6]);
    }

    #[test]
    fn big_endian_fields_interleave_without_clobbering() {
        // the four signals of the min/max message with the values the
        // reference frame uses: 2000 mV, 3000 mV, -15 degC, 35 degC
        let mut message = 0u64;
        set_message_data_with_signal_data(&mut message, 10, 13, 2000, Endianness::Big);
        set_message_data_with_signal_data(&mut message, 7, 13, 3000, Endianness::Big);
        set_message_data_with_signal_data(&mut message, 63, 8, (-15i64) as u64, Endianness::Big);
        set_message_data_with_signal_data(&mut message, 55, 8, 35, Endianness::Big);
        let mut data = [0u8; 8];
        set_can_data_with_message_data(message, &mut data, Endianness::Big);
        assert_eq!(data, [0x5D, 0xC1, 0xF4, 0x00, 0x00, 0x00, 0x23, 0xF1]);
    }

    #[test]
    fn little_endian_field_crossing_byte_boundary() {
        let mut message = 0u64;
        set_message_data_with_signal_data(&mut message, 27, 19, 0x7FFFF, Endianness::Little);
        let mut data = [0u8; 8];
        set_can_data_with_message_data(message, &mut data, Endianness::Little);
        assert_eq!(data[3], 0xF8);
        assert_eq!(data[4], 0xFF);
        assert_eq!(data[5], 0x3F);
        assert_eq!(data[0], 0x00);
    }

    #[test]
    fn round_trip_preserves_raw_values() {
        for endianness in [Endianness::Big, Endianness::Little] {
            for (bit_start, bit_length) in [(7u8, 13u8), (11, 13), (0, 1), (32, 16), (63, 8)] {
                let max = if bit_length == 64 {
                    u64::MAX
                } else {
                    (1u64 << bit_length) - 1
                };
                for value in [0, 1, max / 2, max] {
                    let mut message = 0u64;
                    set_message_data_with_signal_data(
                        &mut message,
                        bit_start,
                        bit_length,
                        value,
                        endianness,
                    );
                    let read = get_signal_data_from_message_data(
                        message, bit_start, bit_length, endianness,
                    );
                    assert_eq!(read, value);
                }
            }
        }
    }

    #[test]
    fn round_trip_survives_serialization() {
        let mut message = 0u64;
        set_message_data_with_signal_data(&mut message, 11, 13, 0x1ABC, Endianness::Big);
        let mut data = [0u8; 8];
        set_can_data_with_message_data(message, &mut data, Endianness::Big);
        let restored = get_message_data_from_can_data(&data, Endianness::Big);
        assert_eq!(
            get_signal_data_from_message_data(restored, 11, 13, Endianness::Big),
            0x1ABC
        );
    }

    #[test]
    fn full_width_signal() {
        let mut message = 0u64;
        set_message_data_with_signal_data(&mut message, 0, 64, u64::MAX, Endianness::Little);
        assert_eq!(message, u64::MAX);
    }

    #[test]
    fn scaling_applies_offset_factor_and_clamp() {
        let signal = Signal::new(7, 12, 0.004, 0.0, 0.0, 4095.0);
        let mut value = 250_000.0;
        prepare_signal_data(&mut value, &signal);
        assert_eq!(value, 1000.0);

        let signal = Signal::new(23, 8, 1.0, 0.0, -128.0, 127.0);
        let mut value = 300.0;
        prepare_signal_data(&mut value, &signal);
        assert_eq!(value, 127.0);
        let mut value = -300.0;
        prepare_signal_data(&mut value, &signal);
        assert_eq!(value, -128.0);

        let signal = Signal::new(0, 16, 2.0, 10.0, 0.0, 65535.0);
        let mut value = 5.0;
        prepare_signal_data(&mut value, &signal);
        assert_eq!(value, 30.0);
    }

    #[test]
    #[should_panic]
    fn zero_length_signal_is_rejected() {
        let mut message = 0u64;
        set_message_data_with_signal_data(&mut message, 7, 0, 1, Endianness::Big);
    }
}
