//! ABI encoding for the calls the workflow makes.

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier},
    json_abi::Function,
    primitives::{Address, Bytes},
    sol,
    sol_types::{SolCall, SolValue},
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

sol! {
    /// `ProxyAdmin` upgrade entrypoint (OpenZeppelin v5).
    function upgradeAndCall(address proxy, address implementation, bytes data) external payable;
}

/// Calldata for `ProxyAdmin.upgradeAndCall(proxy, implementation, data)`.
pub fn upgrade_and_call_calldata(proxy: Address, implementation: Address, data: Bytes) -> Bytes {
    upgradeAndCallCall {
        proxy,
        implementation,
        data,
    }
    .abi_encode()
    .into()
}

/// Constructor arguments of `TransparentUpgradeableProxy(address _logic, address initialOwner, bytes _data)`.
pub fn proxy_constructor_args(logic: Address, initial_owner: Address, data: Bytes) -> Bytes {
    (logic, initial_owner, data).abi_encode_params().into()
}

/// A call to an initializer (or any function) described by a human-readable signature.
///
/// ```
/// use hubforge_deploy::InitializerCall;
///
/// let call = InitializerCall::new(
///     "initialize(address oracle, address owner)",
///     ["0x288154C87Db809bc0d702CB46De40E5041b22071", "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"],
/// );
/// assert_eq!(call.encode().unwrap().len(), 4 + 2 * 32);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializerCall {
    /// Signature such as `initialize(address oracle, address owner, address[] vAssets)`.
    pub signature: String,
    /// One textual value per parameter; arrays use `[a,b]` syntax.
    pub args: Vec<String>,
}

impl InitializerCall {
    pub fn new<I, S>(signature: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            signature: signature.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn function(&self) -> anyhow::Result<Function> {
        Function::parse(&self.signature)
            .with_context(|| format!("Invalid function signature: {}", self.signature))
    }

    fn values(&self, function: &Function) -> anyhow::Result<Vec<DynSolValue>> {
        if function.inputs.len() != self.args.len() {
            anyhow::bail!(
                "{} expects {} arguments, got {}",
                function.name,
                function.inputs.len(),
                self.args.len()
            );
        }

        function
            .inputs
            .iter()
            .zip(&self.args)
            .map(|(param, raw)| {
                let ty: DynSolType = param
                    .resolve()
                    .with_context(|| format!("Unsupported parameter type {}", param.ty))?;
                ty.coerce_str(raw)
                    .with_context(|| format!("Cannot encode '{}' as {}", raw, param.ty))
            })
            .collect()
    }

    /// Selector-prefixed calldata.
    pub fn encode(&self) -> anyhow::Result<Bytes> {
        let function = self.function()?;
        let values = self.values(&function)?;
        let calldata = function
            .abi_encode_input(&values)
            .context("Failed to ABI-encode initializer call")?;
        Ok(calldata.into())
    }

    /// Arguments only, without a selector. Used for constructor arguments appended to
    /// creation code, where the signature is written as `constructor(string name, ...)`.
    pub fn encode_params(&self) -> anyhow::Result<Bytes> {
        let function = self.function()?;
        let values = self.values(&function)?;
        let params = function
            .abi_encode_input_raw(&values)
            .context("Failed to ABI-encode constructor arguments")?;
        Ok(params.into())
    }

    /// Arguments keyed by parameter name, for the ledger. Unnamed parameters become `arg<i>`.
    ///
    /// Values are rendered from what was actually encoded, so nested arrays and strings
    /// containing commas are recorded as they reach the chain.
    pub fn named_args(&self) -> anyhow::Result<Value> {
        let function = self.function()?;
        let values = self.values(&function)?;
        let named = function
            .inputs
            .iter()
            .zip(&values)
            .enumerate()
            .map(|(i, (param, value))| {
                let key = if param.name.is_empty() {
                    format!("arg{}", i)
                } else {
                    param.name.clone()
                };
                (key, value_to_json(value))
            })
            .collect::<Map<_, _>>();
        Ok(Value::Object(named))
    }
}

/// JSON form of an encoded value. Integers stay decimal strings so 256-bit values survive.
fn value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::Address(address) => Value::String(address.to_checksum(None)),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(format!("0x{}", hex::encode(&word[..*size])))
        }
        DynSolValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(value_to_json).collect())
        }
        other => Value::String(format!("{:?}", other)),
    }
}
