//! CRC16 integrity check for data frames.
//!
//! Reflected CRC16 (poly 0xA001 bit-serial / 0x8005 non-reflected
//! representation, init 0xFFFF, no final XOR) — the widely-deployed
//! IBM/MODBUS variant. Computed over `seq || len || payload`.

use crc_all::CrcAlgo;

const CRC16_INIT: u16 = 0xFFFF;

const CRC16: CrcAlgo<u16> = CrcAlgo::<u16>::new(
    0x8005,     // polynomial (non-reflected representation of 0xA001)
    16,         // width
    CRC16_INIT, // init
    0,          // xorout
    true,       // reflect in and out
);

/// Computes the CRC16 over `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;
    CRC16.update_crc(&mut crc, data);
    CRC16.finish_crc(&crc)
}

/// Emits `crc16(data)` little-endian, the order frames carry it on the wire.
pub fn crc16_bytes(data: &[u8]) -> [u8; 2] {
    crc16(data).to_le_bytes()
}
