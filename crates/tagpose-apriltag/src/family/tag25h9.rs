use super::TagFamily;

impl TagFamily {
    /// The 25h9 family: 35 codes of 25 bits with a minimum hamming distance of 9.
    pub fn tag25h9() -> Self {
        Self {
            name: "tag25h9".to_string(),
            width_at_border: 7,
            total_width: 9,
            reversed_border: false,
            nbits: 25,
            bit_x: vec![
                1, 2, 3, 4, 2, 3, 5, 5, 5, 5, 4, 4, 5, 4, 3, 2, 4, 3, 1, 1, 1, 1, 2, 2, 3,
            ],
            bit_y: vec![
                1, 1, 1, 1, 2, 2, 1, 2, 3, 4, 2, 3, 5, 5, 5, 5, 4, 4, 5, 4, 3, 2, 4, 3, 3,
            ],
            codes: CODES.to_vec(),
        }
    }
}

#[rustfmt::skip]
const CODES: [u64; 35] = [
    0x156f1f4, 0x1f28cd5, 0x16ce32c, 0x1ea379c, 0x1390f89, 0x034fad0, 0x07dcdb5,
    0x119ba95, 0x1ae9daa, 0x0df02aa, 0x082fc15, 0x0465123, 0x0ceee98, 0x1f17260,
    0x14429cd, 0x17248a8, 0x16ad452, 0x09670ad, 0x16f65b2, 0x0b8322b, 0x05d715b,
    0x1a1c7e7, 0x0d7890d, 0x1813522, 0x1c9c611, 0x099e4a4, 0x0855234, 0x17b81c0,
    0x0c294bb, 0x089fae3, 0x044df5f, 0x1360159, 0x0ec31e8, 0x1bcc0f6, 0x0a64f8d,
];
