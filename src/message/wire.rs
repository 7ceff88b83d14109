//! 链上程序使用的紧凑消息布局：计数字段为 u8，指令数据长度为 u16。

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use borsh::{BorshDeserialize, BorshSerialize};

/// u8 长度前缀的序列，超过 255 个元素时拒绝序列化而不是截断。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmallVecU8<T>(pub Vec<T>);

/// u16 长度前缀的序列，用于指令数据。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmallVecU16<T>(pub Vec<T>);

// 空序列不要求元素类型实现 Default
impl<T> Default for SmallVecU8<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> Default for SmallVecU16<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T: BorshSerialize> BorshSerialize for SmallVecU8<T> {
    fn serialize<W: Write>(&self, writer: &mut W) -> IoResult<()> {
        let len = u8::try_from(self.0.len()).map_err(|_| {
            IoError::new(
                ErrorKind::InvalidData,
                format!("u8 前缀序列长度 {} 溢出", self.0.len()),
            )
        })?;
        len.serialize(writer)?;
        for item in &self.0 {
            item.serialize(writer)?;
        }
        Ok(())
    }
}

impl<T: BorshDeserialize> BorshDeserialize for SmallVecU8<T> {
    fn deserialize_reader<R: Read>(reader: &mut R) -> IoResult<Self> {
        let len = u8::deserialize_reader(reader)? as usize;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(T::deserialize_reader(reader)?);
        }
        Ok(Self(items))
    }
}

impl<T: BorshSerialize> BorshSerialize for SmallVecU16<T> {
    fn serialize<W: Write>(&self, writer: &mut W) -> IoResult<()> {
        let len = u16::try_from(self.0.len()).map_err(|_| {
            IoError::new(
                ErrorKind::InvalidData,
                format!("u16 前缀序列长度 {} 溢出", self.0.len()),
            )
        })?;
        len.serialize(writer)?;
        for item in &self.0 {
            item.serialize(writer)?;
        }
        Ok(())
    }
}

impl<T: BorshDeserialize> BorshDeserialize for SmallVecU16<T> {
    fn deserialize_reader<R: Read>(reader: &mut R) -> IoResult<Self> {
        let len = u16::deserialize_reader(reader)? as usize;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(T::deserialize_reader(reader)?);
        }
        Ok(Self(items))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct WireMessage {
    pub num_signers: u8,
    pub num_writable_signers: u8,
    pub num_writable_non_signers: u8,
    pub account_keys: SmallVecU8<[u8; 32]>,
    pub instructions: SmallVecU8<WireInstruction>,
    pub address_table_lookups: SmallVecU8<WireTableLookup>,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct WireInstruction {
    pub program_id_index: u8,
    pub account_indexes: SmallVecU8<u8>,
    pub data: SmallVecU16<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct WireTableLookup {
    pub account_key: [u8; 32],
    pub writable_indexes: SmallVecU8<u8>,
    pub readonly_indexes: SmallVecU8<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_message_is_six_zero_bytes() {
        let message = WireMessage::default();
        assert!(message.instructions.0.is_empty());
        assert!(message.address_table_lookups.0.is_empty());
        let bytes = borsh::to_vec(&message).expect("serialize");
        assert_eq!(bytes, vec![0u8; 6]);

        let decoded = WireMessage::deserialize(&mut bytes.as_slice()).expect("deserialize");
        assert_eq!(decoded, message);
    }

    #[test]
    fn data_uses_little_endian_u16_prefix() {
        let ix = WireInstruction {
            program_id_index: 1,
            account_indexes: SmallVecU8(vec![0, 2]),
            data: SmallVecU16(vec![0xAA; 300]),
        };
        let bytes = borsh::to_vec(&ix).expect("serialize");
        assert_eq!(&bytes[..4], &[1, 2, 0, 2]);
        assert_eq!(&bytes[4..6], &300u16.to_le_bytes());
        assert_eq!(bytes.len(), 6 + 300);
    }

    #[test]
    fn u8_prefix_overflow_is_rejected() {
        let oversized = SmallVecU8(vec![0u8; 256]);
        let err = borsh::to_vec(&oversized).expect_err("must overflow");
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
