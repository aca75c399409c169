use std::collections::HashMap;

use alloy::{
    dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt},
    json_abi::{Function, JsonAbi, StateMutability},
    primitives::{Address, Bytes, Selector, U256},
};
use anyhow::{Context as _, Result};

use crate::error::{EvmError, PrecompileError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Function,
    Fallback,
    Receive,
}

/// An entry point of a precompile: a selector-addressed function, or the `fallback` or `receive` function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub name: String,
    pub kind: MethodKind,
    pub state_mutability: StateMutability,
    function: Option<Function>,
}

impl Method {
    fn special(kind: MethodKind, state_mutability: StateMutability) -> Method {
        let name = match kind {
            MethodKind::Fallback => "fallback",
            MethodKind::Receive => "receive",
            MethodKind::Function => "",
        };
        Method {
            name: name.to_owned(),
            kind,
            state_mutability,
            function: None,
        }
    }

    /// Whether the method may modify state.
    pub fn is_transaction(&self) -> bool {
        !matches!(
            self.state_mutability,
            StateMutability::Pure | StateMutability::View
        )
    }

    pub fn is_payable(&self) -> bool {
        self.state_mutability == StateMutability::Payable
    }

    pub fn selector(&self) -> Option<Selector> {
        self.function.as_ref().map(Function::selector)
    }

    pub fn function(&self) -> Option<&Function> {
        self.function.as_ref()
    }
}

/// A parsed precompile ABI with its methods indexed by selector. Immutable once built.
#[derive(Debug, Clone)]
pub struct PrecompileAbi {
    abi: JsonAbi,
    methods: HashMap<Selector, Method>,
    fallback: Option<Method>,
    receive: Option<Method>,
}

impl PrecompileAbi {
    pub fn from_json(json: &str) -> Result<PrecompileAbi> {
        let abi: JsonAbi = serde_json::from_str(json).context("invalid precompile ABI")?;
        let methods = abi
            .functions()
            .map(|f| {
                (
                    f.selector(),
                    Method {
                        name: f.name.clone(),
                        kind: MethodKind::Function,
                        state_mutability: f.state_mutability,
                        function: Some(f.clone()),
                    },
                )
            })
            .collect();
        let fallback = abi
            .fallback
            .as_ref()
            .map(|f| Method::special(MethodKind::Fallback, f.state_mutability));
        let receive = abi
            .receive
            .as_ref()
            .map(|r| Method::special(MethodKind::Receive, r.state_mutability));
        Ok(PrecompileAbi {
            abi,
            methods,
            fallback,
            receive,
        })
    }

    pub fn json_abi(&self) -> &JsonAbi {
        &self.abi
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn has_receive(&self) -> bool {
        self.receive.is_some()
    }

    pub fn method_by_selector(&self, selector: &[u8]) -> Result<&Method, EvmError> {
        let selector = Selector::try_from(selector)
            .map_err(|_| EvmError::AbiUnpack(format!("invalid method id {selector:?}")))?;
        self.methods
            .get(&selector)
            .ok_or_else(|| EvmError::AbiUnpack(format!("no method with id: {selector}")))
    }

    pub fn method_by_name(&self, name: &str) -> Option<&Method> {
        self.methods.values().find(|m| m.name == name)
    }

    /// Selects the method which handles a call with `input` and `value`.
    pub fn resolve(&self, input: &[u8], value: U256) -> Result<&Method, PrecompileError> {
        let method = match input.len() {
            0 => match (&self.receive, &self.fallback) {
                (Some(receive), _) if !value.is_zero() => Some(receive),
                (_, fallback) => fallback.as_ref(),
            },
            1..4 => self.fallback.as_ref(),
            _ => self
                .method_by_selector(&input[..4])
                .ok()
                .or(self.fallback.as_ref()),
        };
        method.ok_or(PrecompileError::ExecutionReverted(None))
    }

    /// Decodes the arguments of a call to `method`. `fallback` and `receive` take no arguments.
    pub fn unpack_inputs(&self, method: &Method, input: &[u8]) -> Result<Vec<DynSolValue>, EvmError> {
        let Some(function) = &method.function else {
            return Ok(Vec::new());
        };
        let args = input
            .get(4..)
            .ok_or_else(|| EvmError::AbiUnpack("input shorter than a method id".to_owned()))?;
        function
            .abi_decode_input(args, true)
            .map_err(|e| EvmError::AbiUnpack(format!("{}: {e}", method.name)))
    }

    pub fn pack_outputs(&self, method: &Method, values: &[DynSolValue]) -> Result<Bytes, EvmError> {
        let Some(function) = &method.function else {
            return Ok(Bytes::new());
        };
        function
            .abi_encode_output(values)
            .map(Bytes::from)
            .map_err(|e| EvmError::AbiPack(format!("{}: {e}", method.name)))
    }

    /// Encodes a call to the function `name`, including its selector.
    pub fn encode_call(&self, name: &str, args: &[DynSolValue]) -> Result<Bytes, EvmError> {
        let function = self
            .method_by_name(name)
            .and_then(Method::function)
            .ok_or_else(|| EvmError::AbiPack(format!("no method named {name}")))?;
        function
            .abi_encode_input(args)
            .map(Bytes::from)
            .map_err(|e| EvmError::AbiPack(format!("{name}: {e}")))
    }

    /// Decodes the return data of a call to the function `name`.
    pub fn decode_output(&self, name: &str, data: &[u8]) -> Result<Vec<DynSolValue>, EvmError> {
        let function = self
            .method_by_name(name)
            .and_then(Method::function)
            .ok_or_else(|| EvmError::AbiUnpack(format!("no method named {name}")))?;
        function
            .abi_decode_output(data, true)
            .map_err(|e| EvmError::AbiUnpack(format!("{name}: {e}")))
    }
}

/// The address argument at `index`.
pub fn address_arg(args: &[DynSolValue], index: usize) -> Result<Address, EvmError> {
    args.get(index)
        .and_then(DynSolValue::as_address)
        .ok_or_else(|| EvmError::AbiUnpack(format!("argument {index} is not an address")))
}

/// The unsigned integer argument at `index`.
pub fn uint_arg(args: &[DynSolValue], index: usize) -> Result<U256, EvmError> {
    args.get(index)
        .and_then(DynSolValue::as_uint)
        .map(|(value, _)| value)
        .ok_or_else(|| EvmError::AbiUnpack(format!("argument {index} is not an unsigned integer")))
}
