// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Typed contract ABI.
//!
//! An [`AbiDescriptor`] is built once from a JSON ABI and maps each method
//! name to its parameter and return types. Every [`ContractCallSpec`] is
//! checked against it before anything goes over the wire.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use alloy::{
    dyn_abi::{DynSolType, DynSolValue},
    json_abi::{JsonAbi, Param, StateMutability},
    primitives::{Address, Bytes, B256, I256, U256},
};

use crate::error::{CustodyError, CustodyResult};

// =============================================================================
// Types and values
// =============================================================================

/// Parameter type supported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiType {
    Uint(usize),
    Int(usize),
    Address,
    Bool,
    String,
    Bytes,
    FixedBytes(usize),
    Array(Box<AbiType>),
}

impl AbiType {
    /// `None` for tuples, fixed-size arrays and function pointers.
    fn from_dyn(ty: &DynSolType) -> Option<Self> {
        Some(match ty {
            DynSolType::Bool => Self::Bool,
            DynSolType::Int(bits) => Self::Int(*bits),
            DynSolType::Uint(bits) => Self::Uint(*bits),
            DynSolType::FixedBytes(size) => Self::FixedBytes(*size),
            DynSolType::Address => Self::Address,
            DynSolType::Bytes => Self::Bytes,
            DynSolType::String => Self::String,
            DynSolType::Array(inner) => Self::Array(Box::new(Self::from_dyn(inner)?)),
            _ => return None,
        })
    }

    fn to_dyn(&self) -> DynSolType {
        match self {
            Self::Uint(bits) => DynSolType::Uint(*bits),
            Self::Int(bits) => DynSolType::Int(*bits),
            Self::Address => DynSolType::Address,
            Self::Bool => DynSolType::Bool,
            Self::String => DynSolType::String,
            Self::Bytes => DynSolType::Bytes,
            Self::FixedBytes(size) => DynSolType::FixedBytes(*size),
            Self::Array(inner) => DynSolType::Array(Box::new(inner.to_dyn())),
        }
    }
}

impl fmt::Display for AbiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uint(bits) => write!(f, "uint{bits}"),
            Self::Int(bits) => write!(f, "int{bits}"),
            Self::Address => f.write_str("address"),
            Self::Bool => f.write_str("bool"),
            Self::String => f.write_str("string"),
            Self::Bytes => f.write_str("bytes"),
            Self::FixedBytes(size) => write!(f, "bytes{size}"),
            Self::Array(inner) => write!(f, "{inner}[]"),
        }
    }
}

/// A typed argument or return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Uint(U256),
    Int(I256),
    Address(Address),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    /// Left-aligned `bytesN`; the length is `N`.
    FixedBytes(Vec<u8>),
    Array(Vec<AbiValue>),
}

impl AbiValue {
    /// Encode ASCII text as a right-padded `bytes32`, the way titles and
    /// usernames are stored by the registry.
    pub fn bytes32_from_ascii(text: &str) -> CustodyResult<Self> {
        if !text.is_ascii() {
            return Err(CustodyError::InvalidCall(format!(
                "`{text}` is not ASCII and cannot be stored as bytes32"
            )));
        }
        if text.len() > 32 {
            return Err(CustodyError::InvalidCall(format!(
                "`{text}` is longer than 32 bytes"
            )));
        }
        let mut word = vec![0u8; 32];
        word[..text.len()].copy_from_slice(text.as_bytes());
        Ok(Self::FixedBytes(word))
    }

    /// Inverse of [`bytes32_from_ascii`](Self::bytes32_from_ascii): trailing
    /// zero padding is stripped. `None` if this is not ASCII `bytesN`.
    pub fn ascii_from_bytes32(&self) -> Option<String> {
        let Self::FixedBytes(bytes) = self else {
            return None;
        };
        let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        let text = &bytes[..end];
        if text.iter().all(|b| b.is_ascii() && !b.is_ascii_control()) {
            String::from_utf8(text.to_vec()).ok()
        } else {
            None
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            Self::Address(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<U256> {
        match self {
            Self::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[AbiValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Text form used when comparing on-chain values with pending entries.
    ///
    /// Addresses and raw bytes render as lowercase `0x` hex, integers in
    /// decimal and ASCII `bytesN` as the text it holds.
    pub fn to_key_string(&self) -> String {
        match self {
            Self::Uint(v) => v.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Address(a) => format!("{a:?}").to_lowercase(),
            Self::Bool(b) => b.to_string(),
            Self::String(s) => s.clone(),
            Self::Bytes(b) => format!("0x{}", alloy::hex::encode(b)),
            Self::FixedBytes(b) => self
                .ascii_from_bytes32()
                .unwrap_or_else(|| format!("0x{}", alloy::hex::encode(b))),
            Self::Array(items) => items
                .iter()
                .map(Self::to_key_string)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Whether this value can be passed where `ty` is expected.
    pub fn matches(&self, ty: &AbiType) -> bool {
        match (self, ty) {
            (Self::Uint(v), AbiType::Uint(bits)) => v.bit_len() <= *bits,
            (Self::Int(v), AbiType::Int(bits)) => {
                // Two's complement: magnitude below 2^(bits-1), or exactly
                // 2^(bits-1) for the minimum value.
                let magnitude = v.unsigned_abs();
                *bits == 256
                    || magnitude.bit_len() < *bits
                    || (v.is_negative() && magnitude == U256::from(1u8) << (*bits - 1))
            }
            (Self::Address(_), AbiType::Address)
            | (Self::Bool(_), AbiType::Bool)
            | (Self::String(_), AbiType::String)
            | (Self::Bytes(_), AbiType::Bytes) => true,
            (Self::FixedBytes(b), AbiType::FixedBytes(size)) => b.len() == *size,
            (Self::Array(items), AbiType::Array(inner)) => {
                items.iter().all(|item| item.matches(inner))
            }
            _ => false,
        }
    }

    /// Caller checks [`matches`](Self::matches) first.
    fn to_dyn(&self, ty: &AbiType) -> DynSolValue {
        match (self, ty) {
            (Self::Uint(v), AbiType::Uint(bits)) => DynSolValue::Uint(*v, *bits),
            (Self::Int(v), AbiType::Int(bits)) => DynSolValue::Int(*v, *bits),
            (Self::Address(a), _) => DynSolValue::Address(*a),
            (Self::Bool(b), _) => DynSolValue::Bool(*b),
            (Self::String(s), _) => DynSolValue::String(s.clone()),
            (Self::Bytes(b), _) => DynSolValue::Bytes(b.clone()),
            (Self::FixedBytes(b), _) => {
                let mut word = B256::ZERO;
                word.0[..b.len()].copy_from_slice(b);
                DynSolValue::FixedBytes(word, b.len())
            }
            (Self::Array(items), AbiType::Array(inner)) => {
                DynSolValue::Array(items.iter().map(|item| item.to_dyn(inner)).collect())
            }
            // Unreachable after `matches`; encode with the value's own width.
            (Self::Uint(v), _) => DynSolValue::Uint(*v, 256),
            (Self::Int(v), _) => DynSolValue::Int(*v, 256),
            (Self::Array(items), _) => {
                DynSolValue::Array(items.iter().map(|item| item.to_dyn(ty)).collect())
            }
        }
    }

    fn from_dyn(value: DynSolValue) -> CustodyResult<Self> {
        Ok(match value {
            DynSolValue::Bool(b) => Self::Bool(b),
            DynSolValue::Int(v, _) => Self::Int(v),
            DynSolValue::Uint(v, _) => Self::Uint(v),
            DynSolValue::FixedBytes(word, size) => Self::FixedBytes(word[..size].to_vec()),
            DynSolValue::Address(a) => Self::Address(a),
            DynSolValue::Bytes(b) => Self::Bytes(b),
            DynSolValue::String(s) => Self::String(s),
            DynSolValue::Array(items) | DynSolValue::FixedArray(items) => Self::Array(
                items
                    .into_iter()
                    .map(Self::from_dyn)
                    .collect::<CustodyResult<_>>()?,
            ),
            other => {
                return Err(CustodyError::ReturnDecoding(format!(
                    "unsupported return value {other:?}"
                )))
            }
        })
    }
}

impl From<Address> for AbiValue {
    fn from(a: Address) -> Self {
        Self::Address(a)
    }
}

impl From<U256> for AbiValue {
    fn from(v: U256) -> Self {
        Self::Uint(v)
    }
}

impl From<u64> for AbiValue {
    fn from(v: u64) -> Self {
        Self::Uint(U256::from(v))
    }
}

impl From<bool> for AbiValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for AbiValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for AbiValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

// =============================================================================
// Call spec
// =============================================================================

/// One contract invocation: method, optional sender and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCallSpec {
    pub method: String,
    pub from: Option<Address>,
    pub args: Vec<AbiValue>,
}

impl ContractCallSpec {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            from: None,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<AbiValue>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn from_address(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }
}

// =============================================================================
// Descriptor
// =============================================================================

/// Resolved signature of one contract method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSpec {
    pub name: String,
    pub selector: [u8; 4],
    pub inputs: Vec<AbiType>,
    pub outputs: Vec<AbiType>,
    /// `view` or `pure`; such methods cannot be sent as transactions.
    pub read_only: bool,
}

impl MethodSpec {
    /// Check argument count and types.
    pub fn check_args(&self, args: &[AbiValue]) -> CustodyResult<()> {
        if args.len() != self.inputs.len() {
            return Err(CustodyError::InvalidCall(format!(
                "{} takes {} arguments, got {}",
                self.name,
                self.inputs.len(),
                args.len()
            )));
        }
        for (position, (value, ty)) in args.iter().zip(&self.inputs).enumerate() {
            if !value.matches(ty) {
                return Err(CustodyError::InvalidCall(format!(
                    "{} argument {position} must be {ty}, got {value:?}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Selector followed by the ABI-encoded arguments.
    pub fn encode_call(&self, args: &[AbiValue]) -> CustodyResult<Bytes> {
        self.check_args(args)?;
        let values = args
            .iter()
            .zip(&self.inputs)
            .map(|(value, ty)| value.to_dyn(ty))
            .collect();
        let encoded = DynSolValue::Tuple(values).abi_encode_params();

        let mut input = Vec::with_capacity(4 + encoded.len());
        input.extend_from_slice(&self.selector);
        input.extend_from_slice(&encoded);
        Ok(Bytes::from(input))
    }

    /// Decode return data into the declared output types.
    pub fn decode_output(&self, data: &[u8]) -> CustodyResult<Vec<AbiValue>> {
        if self.outputs.is_empty() {
            return Ok(Vec::new());
        }
        let ty = DynSolType::Tuple(self.outputs.iter().map(AbiType::to_dyn).collect());
        let decoded = ty.abi_decode_params(data).map_err(|e| {
            CustodyError::ReturnDecoding(format!("{} returned malformed data: {e}", self.name))
        })?;
        match decoded {
            DynSolValue::Tuple(values) => values.into_iter().map(AbiValue::from_dyn).collect(),
            single => Ok(vec![AbiValue::from_dyn(single)?]),
        }
    }
}

/// Method table of one contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbiDescriptor {
    methods: BTreeMap<String, MethodSpec>,
}

impl AbiDescriptor {
    /// Parse a JSON ABI, either a bare array or a build artifact with an
    /// `abi` field.
    pub fn from_json(json: &str) -> CustodyResult<Self> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| CustodyError::Decoding(format!("invalid ABI JSON: {e}")))?;
        let abi_value = match value {
            serde_json::Value::Object(mut artifact) => artifact
                .remove("abi")
                .ok_or_else(|| CustodyError::Decoding("artifact has no `abi` field".to_string()))?,
            other => other,
        };
        let abi: JsonAbi = serde_json::from_value(abi_value)
            .map_err(|e| CustodyError::Decoding(format!("invalid ABI: {e}")))?;
        Self::from_json_abi(&abi)
    }

    pub fn from_file(path: &Path) -> CustodyResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            CustodyError::Config(format!("cannot read ABI {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Resolve every function. Overloaded names and unsupported parameter
    /// types are rejected here rather than at call time.
    pub fn from_json_abi(abi: &JsonAbi) -> CustodyResult<Self> {
        let mut methods = BTreeMap::new();
        for (name, overloads) in &abi.functions {
            let [function] = overloads.as_slice() else {
                return Err(CustodyError::Decoding(format!(
                    "method {name} is overloaded ({} variants)",
                    overloads.len()
                )));
            };
            let spec = MethodSpec {
                name: name.clone(),
                selector: function.selector().0,
                inputs: resolve_params(name, &function.inputs)?,
                outputs: resolve_params(name, &function.outputs)?,
                read_only: matches!(
                    function.state_mutability,
                    StateMutability::View | StateMutability::Pure
                ),
            };
            methods.insert(name.clone(), spec);
        }
        Ok(Self { methods })
    }

    pub fn method(&self, name: &str) -> Option<&MethodSpec> {
        self.methods.get(name)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Look up `spec.method` and type-check its arguments.
    pub fn validate(&self, spec: &ContractCallSpec) -> CustodyResult<&MethodSpec> {
        let method = self.method(&spec.method).ok_or_else(|| {
            CustodyError::InvalidCall(format!("method {} is not in the contract ABI", spec.method))
        })?;
        method.check_args(&spec.args)?;
        Ok(method)
    }
}

fn resolve_params(method: &str, params: &[Param]) -> CustodyResult<Vec<AbiType>> {
    params
        .iter()
        .map(|param| {
            DynSolType::parse(&param.ty)
                .ok()
                .as_ref()
                .and_then(AbiType::from_dyn)
                .ok_or_else(|| {
                    CustodyError::Decoding(format!(
                        "method {method} uses unsupported type {}",
                        param.ty
                    ))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY_ABI: &str = r#"[
        {"type":"function","name":"createUser","stateMutability":"nonpayable",
         "inputs":[{"name":"user","type":"address"},{"name":"userType","type":"uint256"},{"name":"name","type":"bytes32"}],
         "outputs":[]},
        {"type":"function","name":"getAllUsers","stateMutability":"view",
         "inputs":[],"outputs":[{"name":"","type":"address[]"}]},
        {"type":"function","name":"getUserDetails","stateMutability":"view",
         "inputs":[{"name":"user","type":"address"}],
         "outputs":[{"name":"","type":"bytes32"},{"name":"","type":"uint256"},{"name":"","type":"bool"}]}
    ]"#;

    #[test]
    fn parses_methods_and_mutability() {
        let abi = AbiDescriptor::from_json(REGISTRY_ABI).unwrap();
        let create = abi.method("createUser").unwrap();
        assert!(!create.read_only);
        assert_eq!(
            create.inputs,
            vec![AbiType::Address, AbiType::Uint(256), AbiType::FixedBytes(32)]
        );
        assert!(abi.method("getAllUsers").unwrap().read_only);
        assert_eq!(
            abi.method_names().collect::<Vec<_>>(),
            vec!["createUser", "getAllUsers", "getUserDetails"]
        );
    }

    #[test]
    fn accepts_build_artifacts() {
        let artifact = format!(r#"{{"contractName":"Registry","abi":{REGISTRY_ABI}}}"#);
        let abi = AbiDescriptor::from_json(&artifact).unwrap();
        assert!(abi.method("createUser").is_some());
        assert!(AbiDescriptor::from_json(r#"{"contractName":"Registry"}"#).is_err());
    }

    #[test]
    fn rejects_overloads_and_tuples() {
        let overloaded = r#"[
            {"type":"function","name":"f","stateMutability":"view","inputs":[],"outputs":[]},
            {"type":"function","name":"f","stateMutability":"view","inputs":[{"name":"a","type":"uint256"}],"outputs":[]}
        ]"#;
        assert!(matches!(
            AbiDescriptor::from_json(overloaded),
            Err(CustodyError::Decoding(_))
        ));

        let tuple = r#"[
            {"type":"function","name":"g","stateMutability":"view",
             "inputs":[{"name":"p","type":"tuple","components":[{"name":"a","type":"uint256"}]}],
             "outputs":[]}
        ]"#;
        assert!(matches!(
            AbiDescriptor::from_json(tuple),
            Err(CustodyError::Decoding(_))
        ));
    }

    #[test]
    fn validation_checks_name_count_and_types() {
        let abi = AbiDescriptor::from_json(REGISTRY_ABI).unwrap();
        let name = AbiValue::bytes32_from_ascii("alice").unwrap();

        let ok = ContractCallSpec::new("createUser")
            .arg(Address::repeat_byte(1))
            .arg(1u64)
            .arg(name.clone());
        assert!(abi.validate(&ok).is_ok());

        let unknown = ContractCallSpec::new("dropTables");
        assert!(matches!(abi.validate(&unknown), Err(CustodyError::InvalidCall(_))));

        let short = ContractCallSpec::new("createUser").arg(Address::repeat_byte(1));
        assert!(matches!(abi.validate(&short), Err(CustodyError::InvalidCall(_))));

        let swapped = ContractCallSpec::new("createUser")
            .arg(1u64)
            .arg(Address::repeat_byte(1))
            .arg(name);
        assert!(matches!(abi.validate(&swapped), Err(CustodyError::InvalidCall(_))));
    }

    #[test]
    fn integer_width_is_enforced() {
        assert!(AbiValue::Uint(U256::from(255)).matches(&AbiType::Uint(8)));
        assert!(!AbiValue::Uint(U256::from(256)).matches(&AbiType::Uint(8)));
        assert!(AbiValue::Int(I256::try_from(-128i64).unwrap()).matches(&AbiType::Int(16)));
        assert!(!AbiValue::Int(I256::try_from(40_000i64).unwrap()).matches(&AbiType::Int(16)));
        assert!(AbiValue::Int(I256::try_from(-128i64).unwrap()).matches(&AbiType::Int(8)));
        assert!(AbiValue::Int(I256::try_from(127i64).unwrap()).matches(&AbiType::Int(8)));
        assert!(!AbiValue::Int(I256::try_from(128i64).unwrap()).matches(&AbiType::Int(8)));
        assert!(!AbiValue::Int(I256::try_from(-129i64).unwrap()).matches(&AbiType::Int(8)));
        assert!(AbiValue::Int(I256::MIN).matches(&AbiType::Int(256)));
        assert!(!AbiValue::FixedBytes(vec![0; 31]).matches(&AbiType::FixedBytes(32)));
    }

    #[test]
    fn encodes_selector_and_arguments() {
        let abi = AbiDescriptor::from_json(REGISTRY_ABI).unwrap();
        let method = abi.method("getUserDetails").unwrap();
        let user = Address::repeat_byte(0xaa);
        let input = method.encode_call(&[AbiValue::Address(user)]).unwrap();

        assert_eq!(input.len(), 4 + 32);
        assert_eq!(&input[..4], &method.selector);
        assert_eq!(&input[16..36], user.as_slice());
    }

    #[test]
    fn decodes_outputs() {
        let abi = AbiDescriptor::from_json(REGISTRY_ABI).unwrap();
        let method = abi.method("getUserDetails").unwrap();

        let mut name = B256::ZERO;
        name.0[..5].copy_from_slice(b"alice");
        let data = DynSolValue::Tuple(vec![
            DynSolValue::FixedBytes(name, 32),
            DynSolValue::Uint(U256::from(2), 256),
            DynSolValue::Bool(true),
        ])
        .abi_encode_params();

        let values = method.decode_output(&data).unwrap();
        assert_eq!(values[0].ascii_from_bytes32().as_deref(), Some("alice"));
        assert_eq!(values[1].as_uint(), Some(U256::from(2)));
        assert_eq!(values[2].as_bool(), Some(true));
    }

    #[test]
    fn short_return_data_is_a_decoding_error() {
        let abi = AbiDescriptor::from_json(REGISTRY_ABI).unwrap();
        let method = abi.method("getAllUsers").unwrap();
        assert!(matches!(
            method.decode_output(&[]),
            Err(CustodyError::ReturnDecoding(_))
        ));
    }

    #[test]
    fn bytes32_text_helpers() {
        let value = AbiValue::bytes32_from_ascii("Audit").unwrap();
        assert!(value.matches(&AbiType::FixedBytes(32)));
        assert_eq!(value.ascii_from_bytes32().as_deref(), Some("Audit"));
        assert_eq!(value.to_key_string(), "Audit");

        assert!(AbiValue::bytes32_from_ascii(&"x".repeat(33)).is_err());
        assert!(AbiValue::bytes32_from_ascii("café").is_err());
        assert!(AbiValue::FixedBytes(vec![0xff; 32]).ascii_from_bytes32().is_none());
    }

    #[test]
    fn key_strings() {
        let address: Address = "0xF39FD6E51AAD88F6F4CE6AB8827279CFFFB92266".parse().unwrap();
        assert_eq!(
            AbiValue::Address(address).to_key_string(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        assert_eq!(AbiValue::Uint(U256::from(42)).to_key_string(), "42");
        assert_eq!(AbiValue::Bytes(vec![0xde, 0xad]).to_key_string(), "0xdead");
    }
}
