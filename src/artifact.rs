//! Decoding of compiled contract artifacts.
//!
//! A compiler toolchain (forge, hardhat, solc's combined JSON) writes one JSON document per contract. The harness
//! only needs three things out of it: the ABI, the constructor bytecode and the runtime bytecode. Everything else
//! in the document is ignored.
//!
//! The primary entrypoint for this module is [`Artifact::from_slice`].
//!
//! # Examples
//!
//! ```
//! use evm_state_bench::artifact::Artifact;
//!
//! let artifact = Artifact::from_slice(
//!     br#"{"bytecode":{"object":"0x6001600201"},"deployedBytecode":{"object":"0x00"}}"#,
//! )
//! .expect("could not decode artifact");
//!
//! assert_eq!(artifact.bytecode.to_vec(), vec![0x60, 0x01, 0x60, 0x02, 0x01]);
//! assert_eq!(artifact.deployed_bytecode.to_vec(), vec![0x00]);
//! ```

use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
};

use ethers_core::{
    abi::{
        token::{LenientTokenizer, Tokenizer},
        Abi, Function, ParamType, Token,
    },
    types::{Bytes, U256},
    utils::hex,
};
use serde::{de, Deserialize, Deserializer};
use serde_json::value::RawValue;

/// Field of an artifact document that the loader reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactField {
    /// The `abi` array.
    Abi,
    /// The `bytecode` object, holding constructor code.
    Bytecode,
    /// The `deployedBytecode` object, holding runtime code.
    DeployedBytecode,
}

impl ArtifactField {
    /// Key of this field in the artifact document.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Abi => "abi",
            Self::Bytecode => "bytecode",
            Self::DeployedBytecode => "deployedBytecode",
        }
    }
}

impl Display for ArtifactField {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Errors produced while decoding an artifact or using its ABI.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// The document is not a JSON object.
    #[error("malformed artifact: {0}")]
    Json(#[source] serde_json::Error),
    /// The `abi` fragment could not be parsed as a contract ABI.
    #[error("malformed abi: {0}")]
    Abi(#[source] serde_json::Error),
    /// A bytecode fragment is not an object with a string `object` field.
    #[error("malformed {field}: {source}")]
    Field {
        /// Field that failed.
        field: ArtifactField,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// A bytecode fragment is present but carries no `object` field.
    #[error("{field} has no object field")]
    MissingObject {
        /// Field that failed.
        field: ArtifactField,
    },
    /// A bytecode `object` is not valid hexadecimal.
    #[error("decode {field}: {source}")]
    Hex {
        /// Field that failed.
        field: ArtifactField,
        /// Underlying hex error.
        #[source]
        source: hex::FromHexError,
    },
    /// The ABI has no function with the requested name.
    #[error("abi has no function named {0}")]
    UnknownFunction(String),
    /// Call data could not be produced or read for a function.
    #[error("{function}: {source}")]
    Encode {
        /// Function being encoded or decoded.
        function: String,
        /// Underlying ABI error.
        #[source]
        source: ethers_core::abi::Error,
    },
    /// Call data does not start with the selector of the requested function.
    #[error("call data does not start with the selector of {0}")]
    Selector(String),
    /// The number of arguments does not match the function's inputs.
    #[error("{function} takes {expected} arguments, got {actual}")]
    Arguments {
        /// Function being called.
        function: String,
        /// Number of declared inputs.
        expected: usize,
        /// Number of provided arguments.
        actual: usize,
    },
}

/// A decoded compiler artifact.
///
/// Holds the contract ABI together with the constructor (creation) code and the runtime (deployed) code. Either
/// bytecode is empty when its key is absent from the source document.
#[derive(Clone, Debug, Default)]
pub struct Artifact {
    /// Contract ABI, used to encode call data and decode return data.
    pub abi: Abi,
    /// Constructor bytecode, to be sent in a contract creation.
    pub bytecode: Bytes,
    /// Runtime bytecode, as stored in the account after creation.
    pub deployed_bytecode: Bytes,
}

type Fragments = HashMap<String, Box<RawValue>>;

#[derive(Deserialize)]
struct BytecodeObject {
    object: Option<String>,
}

impl Artifact {
    /// Decodes an artifact from raw JSON bytes.
    ///
    /// The top level is read as a map of raw JSON fragments so that unknown keys are tolerated. Each of `abi`,
    /// `bytecode` and `deployedBytecode` is decoded only when present.
    ///
    /// # Errors
    ///
    /// Returns an [`ArtifactError`] naming the offending field if the document is not a JSON object, if the ABI is
    /// malformed, if a bytecode fragment lacks its `object` string, or if that string is not hexadecimal. No
    /// partially decoded artifact is ever returned.
    pub fn from_slice(data: &[u8]) -> Result<Self, ArtifactError> {
        let raw: Fragments = serde_json::from_slice(data).map_err(ArtifactError::Json)?;
        Self::from_fragments(&raw)
    }

    fn from_fragments(raw: &Fragments) -> Result<Self, ArtifactError> {
        let abi = raw
            .get(ArtifactField::Abi.key())
            .map(|fragment| serde_json::from_str::<Abi>(fragment.get()))
            .transpose()
            .map_err(ArtifactError::Abi)?
            .unwrap_or_default();

        let bytecode = decode_bytecode(raw, ArtifactField::Bytecode)?;
        let deployed_bytecode = decode_bytecode(raw, ArtifactField::DeployedBytecode)?;

        Ok(Self {
            abi,
            bytecode,
            deployed_bytecode,
        })
    }

    /// Looks up a function of the ABI by name.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::UnknownFunction`] if no function has that name.
    pub fn function(&self, name: &str) -> Result<&Function, ArtifactError> {
        self.abi
            .function(name)
            .map_err(|_| ArtifactError::UnknownFunction(name.to_string()))
    }

    /// Encodes call data (selector followed by arguments) for the named function.
    ///
    /// # Errors
    ///
    /// Fails if the function is unknown or the tokens do not match its inputs.
    pub fn encode_call(&self, name: &str, args: &[Token]) -> Result<Bytes, ArtifactError> {
        let function = self.function(name)?;
        if function.inputs.len() != args.len() {
            return Err(ArtifactError::Arguments {
                function: name.to_string(),
                expected: function.inputs.len(),
                actual: args.len(),
            });
        }
        function
            .encode_input(args)
            .map(Bytes::from)
            .map_err(|source| ArtifactError::Encode {
                function: name.to_string(),
                source,
            })
    }

    /// Decodes call data produced by [`Artifact::encode_call`] back into argument tokens.
    ///
    /// # Errors
    ///
    /// Fails if the function is unknown, the selector does not match, or the payload is malformed.
    pub fn decode_call(&self, name: &str, data: &[u8]) -> Result<Vec<Token>, ArtifactError> {
        let function = self.function(name)?;
        let payload = data
            .strip_prefix(function.short_signature().as_slice())
            .ok_or_else(|| ArtifactError::Selector(name.to_string()))?;
        function
            .decode_input(payload)
            .map_err(|source| ArtifactError::Encode {
                function: name.to_string(),
                source,
            })
    }

    /// Decodes data returned by the named function.
    ///
    /// # Errors
    ///
    /// Fails if the function is unknown or the data does not match its outputs.
    pub fn decode_output(&self, name: &str, data: &[u8]) -> Result<Vec<Token>, ArtifactError> {
        self.function(name)?
            .decode_output(data)
            .map_err(|source| ArtifactError::Encode {
                function: name.to_string(),
                source,
            })
    }

    /// Parses human-readable argument strings against the inputs of the named function.
    ///
    /// Integers may be given in decimal or `0x` hex, addresses and bytes as hex.
    ///
    /// # Errors
    ///
    /// Fails if the function is unknown, the argument count is wrong, or a value does not parse as its type.
    pub fn tokenize(&self, name: &str, args: &[String]) -> Result<Vec<Token>, ArtifactError> {
        let function = self.function(name)?;
        if function.inputs.len() != args.len() {
            return Err(ArtifactError::Arguments {
                function: name.to_string(),
                expected: function.inputs.len(),
                actual: args.len(),
            });
        }
        function
            .inputs
            .iter()
            .zip(args)
            .map(|(param, value)| {
                tokenize_param(&param.kind, value).map_err(|source| ArtifactError::Encode {
                    function: name.to_string(),
                    source,
                })
            })
            .collect()
    }
}

impl<'de> Deserialize<'de> for Artifact {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Fragments::deserialize(deserializer)?;
        Self::from_fragments(&raw).map_err(de::Error::custom)
    }
}

fn decode_bytecode(
    raw: &Fragments,
    field: ArtifactField,
) -> Result<Bytes, ArtifactError> {
    let Some(fragment) = raw.get(field.key()) else {
        return Ok(Bytes::default());
    };

    let object = serde_json::from_str::<BytecodeObject>(fragment.get())
        .map_err(|source| ArtifactError::Field { field, source })?
        .object
        .ok_or(ArtifactError::MissingObject { field })?;

    decode_hex(&object)
        .map(Bytes::from)
        .map_err(|source| ArtifactError::Hex { field, source })
}

/// Integers with a `0x` prefix are read as hex, two's complement for signed types. Everything else goes through
/// ethabi's lenient tokenizer.
fn tokenize_param(kind: &ParamType, value: &str) -> Result<Token, ethers_core::abi::Error> {
    match (kind, value.strip_prefix("0x")) {
        (ParamType::Uint(_), Some(digits)) => parse_hex_word(digits).map(Token::Uint),
        (ParamType::Int(_), Some(digits)) => parse_hex_word(digits).map(Token::Int),
        _ => LenientTokenizer::tokenize(kind, value),
    }
}

fn parse_hex_word(digits: &str) -> Result<U256, ethers_core::abi::Error> {
    U256::from_str_radix(digits, 16)
        .map_err(|err| ethers_core::abi::Error::Other(format!("hex integer {digits}: {err}").into()))
}

/// Decodes a hex string with an optional `0x` prefix.
///
/// # Errors
///
/// Returns the underlying [`hex::FromHexError`] for odd lengths or non-hex characters.
pub fn decode_hex(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
}
