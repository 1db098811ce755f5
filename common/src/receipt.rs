use crate::{
    crypto::{Address, Hash, Hashable},
    serializer::{varint_size, Reader, ReaderError, Serializer, Writer},
};
use serde::{Deserialize, Serialize};

pub const BLOOM_SIZE: usize = 256;
pub const MAX_LOG_TOPICS: usize = 4;

// Event emitted by a contract during execution
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Hash>,
    pub data: Vec<u8>,
    pub height: u64,
    pub tx_hash: Hash,
}

impl Serializer for Log {
    fn write(&self, writer: &mut Writer) {
        self.address.write(writer);
        writer.write_u8(self.topics.len() as u8);
        for topic in &self.topics {
            writer.write_hash(topic);
        }
        writer.write_var_bytes(&self.data);
        writer.write_u64(&self.height);
        writer.write_hash(&self.tx_hash);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let address = Address::read(reader)?;
        let topics_count = reader.read_u8()?;
        if topics_count as usize > MAX_LOG_TOPICS {
            return Err(ReaderError::InvalidValue);
        }

        let mut topics = Vec::with_capacity(topics_count as usize);
        for _ in 0..topics_count {
            topics.push(reader.read_hash()?);
        }
        let data = reader.read_var_bytes()?;
        let height = reader.read_u64()?;
        let tx_hash = reader.read_hash()?;

        Ok(Self {
            address,
            topics,
            data,
            height,
            tx_hash,
        })
    }

    fn size(&self) -> usize {
        self.address.size()
            + 1
            + self.topics.len() * 32
            + varint_size(self.data.len() as u64)
            + self.data.len()
            + 8
            + self.tx_hash.size()
    }
}

// 2048-bit filter over the log addresses and topics of a block
#[derive(Clone, PartialEq, Eq)]
pub struct Bloom([u8; BLOOM_SIZE]);

impl Bloom {
    pub const fn zero() -> Self {
        Bloom([0; BLOOM_SIZE])
    }

    pub fn as_bytes(&self) -> &[u8; BLOOM_SIZE] {
        &self.0
    }

    // Each entry sets three bits derived from its keccak-256
    pub fn add(&mut self, entry: &[u8]) {
        let digest = crate::crypto::hash(entry);
        let bytes = digest.as_bytes();
        for i in [0usize, 2, 4] {
            let bit = (u16::from_be_bytes([bytes[i], bytes[i + 1]]) & 0x7ff) as usize;
            self.0[BLOOM_SIZE - 1 - bit / 8] |= 1 << (bit % 8);
        }
    }

    pub fn contains(&self, entry: &[u8]) -> bool {
        let digest = crate::crypto::hash(entry);
        let bytes = digest.as_bytes();
        for i in [0usize, 2, 4] {
            let bit = (u16::from_be_bytes([bytes[i], bytes[i + 1]]) & 0x7ff) as usize;
            if self.0[BLOOM_SIZE - 1 - bit / 8] & (1 << (bit % 8)) == 0 {
                return false;
            }
        }
        true
    }

    pub fn accrue_log(&mut self, log: &Log) {
        self.add(log.address.as_bytes());
        for topic in &log.topics {
            self.add(topic.as_bytes());
        }
    }
}

impl Default for Bloom {
    fn default() -> Self {
        Bloom::zero()
    }
}

impl std::fmt::Debug for Bloom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bloom(0x{})", hex::encode(self.0))
    }
}

impl Serializer for Bloom {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let bytes: [u8; BLOOM_SIZE] = reader
            .read_bytes(BLOOM_SIZE)?
            .try_into()
            .map_err(|_| ReaderError::InvalidSize)?;
        Ok(Bloom(bytes))
    }

    fn size(&self) -> usize {
        BLOOM_SIZE
    }
}

impl Serialize for Bloom {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'a> Deserialize<'a> for Bloom {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let hex = String::deserialize(deserializer)?;
        let bytes = hex::decode(hex).map_err(serde::de::Error::custom)?;
        let bytes: [u8; BLOOM_SIZE] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("Invalid bloom length"))?;
        Ok(Bloom(bytes))
    }
}

// Per-transaction execution result
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    // true if the transaction executed without a revert
    pub status: bool,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    pub logs: Vec<Log>,
    // Set for contract creations only
    pub contract_address: Option<Address>,
    pub tx_hash: Hash,
}

impl Receipt {
    pub fn new(
        status: bool,
        gas_used: u64,
        cumulative_gas_used: u64,
        logs: Vec<Log>,
        contract_address: Option<Address>,
        tx_hash: Hash,
    ) -> Self {
        Self {
            status,
            gas_used,
            cumulative_gas_used,
            logs,
            contract_address,
            tx_hash,
        }
    }
}

impl Serializer for Receipt {
    fn write(&self, writer: &mut Writer) {
        writer.write_bool(self.status);
        writer.write_u64(&self.gas_used);
        writer.write_u64(&self.cumulative_gas_used);
        self.logs.write(writer);
        self.contract_address.write(writer);
        writer.write_hash(&self.tx_hash);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let status = reader.read_bool()?;
        let gas_used = reader.read_u64()?;
        let cumulative_gas_used = reader.read_u64()?;
        let logs = Vec::read(reader)?;
        let contract_address = Option::read(reader)?;
        let tx_hash = reader.read_hash()?;

        Ok(Self {
            status,
            gas_used,
            cumulative_gas_used,
            logs,
            contract_address,
            tx_hash,
        })
    }

    fn size(&self) -> usize {
        1 + 8 + 8 + self.logs.size() + self.contract_address.size() + self.tx_hash.size()
    }
}

impl Hashable for Receipt {}
