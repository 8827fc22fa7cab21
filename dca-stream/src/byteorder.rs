pub trait WriteBytesBe {
    fn write_be(&self, dst: &mut Vec<u8>);
}

macro_rules! impl_num_be {
    ($($t:ty),+) => { $(
        impl WriteBytesBe for $t { #[inline] fn write_be(&self, dst: &mut Vec<u8>) { dst.extend_from_slice(&self.to_be_bytes()); }}
    )+ }
}

impl_num_be!(u8, i8, u16, i16, u32, i32);

impl<T: WriteBytesBe, const N: usize> WriteBytesBe for [T; N] {
    #[inline]
    fn write_be(&self, dst: &mut Vec<u8>) {
        self.iter().for_each(|item| item.write_be(dst));
    }
}

#[cfg(test)]
mod tests {
    use crate::byteorder::WriteBytesBe;
    use dtsdownmix_macros::ToBytes;

    #[derive(ToBytes)]
    struct Mini {
        a: u16,
        b: i32,
        tag: [u8; 2],
    }

    #[test]
    fn fields_in_declaration_order() {
        let s = Mini {
            a: 0x1234,
            b: -2,
            tag: *b"LP",
        };

        let mut out = Vec::new();
        s.write_be(&mut out);

        assert_eq!(out, [0x12, 0x34, 0xFF, 0xFF, 0xFF, 0xFE, b'L', b'P']);
    }
}
