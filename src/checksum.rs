// CRC16 as used by the DS header and ndstool: reversed polynomial 0xA001,
// initial value 0xFFFF, no final XOR.

const CRC16_POLY: u16 = 0xA001;
const CRC16_INIT: u16 = 0xFFFF;

pub static CRC16_TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ CRC16_POLY
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(CRC16_INIT, |crc, &byte| {
        (crc >> 8) ^ CRC16_TABLE[((crc ^ byte as u16) & 0xFF) as usize]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_reference_entries() {
        assert_eq!(CRC16_TABLE[0], 0x0000);
        assert_eq!(CRC16_TABLE[1], 0xC0C1);
        assert_eq!(CRC16_TABLE[2], 0xC181);
        assert_eq!(CRC16_TABLE[3], 0x0140);
        assert_eq!(CRC16_TABLE[0x80], 0xA001);
        assert_eq!(CRC16_TABLE[255], 0x4040);
    }

    #[test]
    fn empty_buffer_is_initial_value() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn check_vector() {
        assert_eq!(crc16(b"123456789"), 0x4B37);
    }
}
