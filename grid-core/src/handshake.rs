use crate::constants::{SETUP_PACKET_RADIUS_OFFSET, SETUP_PACKET_TYPE};

/// Extract the game-area radius from the initial setup packet.
///
/// Layout: two bytes of client time, the packet type byte, then the radius as
/// an unsigned 24-bit big-endian integer. Anything else yields `None`.
pub fn parse_game_radius(packet: &[u8]) -> Option<u32> {
    if packet.len() < SETUP_PACKET_RADIUS_OFFSET + 3 || packet[2] != SETUP_PACKET_TYPE {
        return None;
    }
    Some(read_u24_be(packet, SETUP_PACKET_RADIUS_OFFSET))
}

#[inline]
fn read_u24_be(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([0, bytes[offset], bytes[offset + 1], bytes[offset + 2]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian_radius() {
        // 21600 = 0x005460
        let packet = [0x00, 0x10, b'a', 0x00, 0x54, 0x60, 0x01, 0x02];
        assert_eq!(parse_game_radius(&packet), Some(21_600));
    }

    #[test]
    fn uses_all_24_bits() {
        let packet = [0, 0, b'a', 0xFF, 0xFF, 0xFF];
        assert_eq!(parse_game_radius(&packet), Some(0x00FF_FFFF));
    }

    #[test]
    fn rejects_other_packets_and_short_input() {
        assert_eq!(parse_game_radius(&[0, 0, b'e', 0, 0x54, 0x60]), None);
        assert_eq!(parse_game_radius(&[0, 0, b'a', 0, 0x54]), None);
        assert_eq!(parse_game_radius(&[]), None);
    }
}
