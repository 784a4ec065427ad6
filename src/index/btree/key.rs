use byteorder::{ByteOrder, LittleEndian};

/// A key type storable in B+tree pages: totally ordered, with a
/// fixed-width byte encoding.
pub trait IndexKey: Ord + Clone + Send + Sync + 'static {
    const ENCODED_SIZE: usize;

    fn encode_into(&self, buf: &mut [u8]);
    fn decode_from(buf: &[u8]) -> Self;
}

impl IndexKey for i32 {
    const ENCODED_SIZE: usize = 4;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(buf, *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_i32(buf)
    }
}

impl IndexKey for i64 {
    const ENCODED_SIZE: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_i64(buf, *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_i64(buf)
    }
}

impl IndexKey for u32 {
    const ENCODED_SIZE: usize = 4;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(buf, *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_u32(buf)
    }
}

impl IndexKey for u64 {
    const ENCODED_SIZE: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(buf, *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_u64(buf)
    }
}
