use super::TagFamily;

impl TagFamily {
    /// The 16h5 family: 30 codes of 16 bits with a minimum hamming distance of 5.
    pub fn tag16h5() -> Self {
        Self {
            name: "tag16h5".to_string(),
            width_at_border: 6,
            total_width: 8,
            reversed_border: false,
            nbits: 16,
            bit_x: vec![1, 2, 3, 2, 4, 4, 4, 3, 4, 3, 2, 3, 1, 1, 1, 2],
            bit_y: vec![1, 1, 1, 2, 1, 2, 3, 2, 4, 4, 4, 3, 4, 3, 2, 3],
            codes: CODES.to_vec(),
        }
    }
}

#[rustfmt::skip]
const CODES: [u64; 30] = [
    0x27c8, 0x31b6, 0x3859, 0x569c, 0x6c76, 0x7ddb, 0xaf09, 0xf5a1,
    0xfb8b, 0x1cb9, 0x28ca, 0xe8dc, 0x1426, 0x5770, 0x9253, 0xb702,
    0x063a, 0x8f34, 0xb4c0, 0x51ec, 0xe6f0, 0x5fa4, 0xdd43, 0x1aaa,
    0xe62f, 0x6dbc, 0xb6eb, 0xde10, 0x154d, 0xb57a,
];
