//! Device tree blob builder for host tests.

pub struct FdtBuilder {
    structs: Vec<u8>,
    strings: Vec<u8>,
}

impl FdtBuilder {
    pub fn new() -> Self {
        Self {
            structs: Vec::new(),
            strings: Vec::new(),
        }
    }

    fn pad(&mut self) {
        while self.structs.len() % 4 != 0 {
            self.structs.push(0);
        }
    }

    fn name_offset(&mut self, name: &str) -> u32 {
        let mut offset = 0;
        for piece in self.strings.split(|&b| b == 0) {
            if piece == name.as_bytes() && offset < self.strings.len() {
                return offset as u32;
            }
            offset += piece.len() + 1;
        }
        let offset = self.strings.len();
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);
        offset as u32
    }

    pub fn raw_token(&mut self, token: u32) {
        self.structs.extend_from_slice(&token.to_be_bytes());
    }

    pub fn begin_node(&mut self, name: &str) {
        self.raw_token(1);
        self.structs.extend_from_slice(name.as_bytes());
        self.structs.push(0);
        self.pad();
    }

    pub fn end_node(&mut self) {
        self.raw_token(2);
    }

    pub fn prop(&mut self, name: &str, value: &[u8]) {
        self.prop_raw_len(name, value.len() as u32);
        self.structs.extend_from_slice(value);
        self.pad();
    }

    /// Property header claiming `len` bytes with no value written.
    pub fn prop_raw_len(&mut self, name: &str, len: u32) {
        let nameoff = self.name_offset(name);
        self.raw_token(3);
        self.structs.extend_from_slice(&len.to_be_bytes());
        self.structs.extend_from_slice(&nameoff.to_be_bytes());
    }

    pub fn nop(&mut self) {
        self.raw_token(4);
    }

    pub fn end(&mut self) {
        self.raw_token(9);
    }

    /// Header, structure block, strings block, then an empty reservation map.
    pub fn finish(self) -> Vec<u8> {
        let off_struct = 40u32;
        let off_strings = off_struct + self.structs.len() as u32;
        let off_rsvmap = (off_strings + self.strings.len() as u32 + 7) & !7;
        let total = off_rsvmap + 16;

        let fields = [
            0xd00d_feed,
            total,
            off_struct,
            off_strings,
            off_rsvmap,
            17,
            16,
            0,
            self.strings.len() as u32,
            self.structs.len() as u32,
        ];
        let mut blob = Vec::with_capacity(total as usize);
        for field in fields {
            blob.extend_from_slice(&field.to_be_bytes());
        }
        blob.extend_from_slice(&self.structs);
        blob.extend_from_slice(&self.strings);
        blob.resize(total as usize, 0);
        blob
    }
}
