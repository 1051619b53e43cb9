use std::fmt;
use std::str::FromStr;

use thiserror::Error;

// system specs

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Protocol {
    MSI,
    MESI,
    Dragon,
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MSI" => Ok(Protocol::MSI),
            "MESI" => Ok(Protocol::MESI),
            "DRAGON" => Ok(Protocol::Dragon),
            _ => Err(ConfigError::UnknownProtocol(s.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::MSI => "MSI",
            Protocol::MESI => "MESI",
            Protocol::Dragon => "Dragon",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unrecognized protocol `{0}` (expected MSI, MESI or DRAGON)")]
    UnknownProtocol(String),
    #[error("{name} must be non-zero")]
    Zero { name: &'static str },
    #[error("{name} = {value} is not a power of two")]
    NotPowerOfTwo { name: &'static str, value: u32 },
    #[error("block size {0} is smaller than one word ({1} bytes)")]
    BlockTooSmall(u32, u32),
    #[error("cache size {cache_size} cannot hold a whole number of {cache_assoc}-way sets of {block_size} byte blocks")]
    IndivisibleSets {
        cache_size: u32,
        block_size: u32,
        cache_assoc: u32,
    },
}

#[derive(Clone, Copy, Debug)]
pub struct SystemSpec {         // unit         reasonable defaults
    pub protocol: Protocol,     //              MESI
    pub word_size: u32,         // bytes        4
    pub address_size: u32,      // bytes        4
    pub mem_lat: u32,           // cpu          100
    pub bus_word_tf_lat: u32,   // cpu          1
    pub block_size: u32,        // bytes        32
    pub cache_size: u32,        // bytes        4096
    pub cache_assoc: u32,       // blocks       2
}

impl Default for SystemSpec {
    fn default() -> Self {
        SystemSpec {
            protocol: Protocol::MESI,
            word_size: 4,       // bytes
            address_size: 4,    // bytes
            mem_lat: 100,       // cpu cycles
            bus_word_tf_lat: 1, // cpu cycles
            block_size: 32,     // bytes
            cache_size: 4096,   // bytes
            cache_assoc: 2,     // blocks
        }
    }
}

impl SystemSpec {
    /// checks that the cache geometry splits an address into exact bit fields
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("cache size", self.cache_size),
            ("block size", self.block_size),
            ("associativity", self.cache_assoc),
            ("word size", self.word_size),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(ConfigError::Zero { name });
            }
            if !value.is_power_of_two() {
                return Err(ConfigError::NotPowerOfTwo { name, value });
            }
        }
        if self.block_size < self.word_size {
            return Err(ConfigError::BlockTooSmall(self.block_size, self.word_size));
        }
        let set_bytes = self.block_size as u64 * self.cache_assoc as u64;
        if set_bytes > self.cache_size as u64 || self.cache_size as u64 % set_bytes != 0 {
            return Err(ConfigError::IndivisibleSets {
                cache_size: self.cache_size,
                block_size: self.block_size,
                cache_assoc: self.cache_assoc,
            });
        }
        Ok(())
    }

    pub fn geometry(&self) -> Geometry {
        let sets = self.cache_size / (self.block_size * self.cache_assoc);
        let offset_bits = self.block_size.trailing_zeros();
        let index_bits = sets.trailing_zeros();
        Geometry {
            sets: sets as usize,
            ways: self.cache_assoc as usize,
            offset_bits,
            index_bits,
            tag_bits: u32::BITS - offset_bits - index_bits,
        }
    }

    pub fn words_per_block(&self) -> u32 {
        self.block_size / self.word_size
    }

    // timing
    pub fn t_word_transfer(&self) -> u32 {
        self.bus_word_tf_lat
    }
    pub fn t_block_transfer(&self) -> u32 {
        self.bus_word_tf_lat * self.words_per_block()
    }
    pub fn t_mem_fetch(&self) -> u32 {
        self.mem_lat
    }
    pub fn t_flush(&self) -> u32 {
        self.mem_lat
    }
}

// addresses and blocks

/// Bit layout of an address for one cache configuration.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Geometry {
    pub sets: usize,
    pub ways: usize,
    pub offset_bits: u32,
    pub index_bits: u32,
    pub tag_bits: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Addr(pub u32);

impl Addr {
    /// get cache index and tag of this address under the given geometry
    pub fn pos(&self, geo: &Geometry) -> (usize, u32) {
        let block = self.0 >> geo.offset_bits;
        let index = block & ((1u32 << geo.index_bits) - 1);
        let tag = block.checked_shr(geo.index_bits).unwrap_or(0);
        (index as usize, tag)
    }

    /// address of the first byte of the block holding this address
    pub fn block(&self, geo: &Geometry) -> Addr {
        Addr(self.0 >> geo.offset_bits << geo.offset_bits)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

// instructions

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Instr {
    Read(Addr),
    Write(Addr),
    Other,
    End,
}
