//! Argument coercion and calldata encoding from JSON ABIs.

use alloy_core::{
    dyn_abi::{DynSolValue, JsonAbiExt, Specifier},
    json_abi::{Function, JsonAbi, Param},
};
use anyhow::Context;

/// Coerce string arguments to the ABI types of `params`.
pub fn coerce_args(params: &[Param], args: &[String]) -> anyhow::Result<Vec<DynSolValue>> {
    if params.len() != args.len() {
        anyhow::bail!("expected {} arguments, got {}", params.len(), args.len());
    }

    params
        .iter()
        .zip(args)
        .map(|(param, arg)| coerce_arg(param, arg))
        .collect()
}

/// Coerce a single string argument to the ABI type of `param`.
pub fn coerce_arg(param: &Param, arg: &str) -> anyhow::Result<DynSolValue> {
    let ty = param
        .resolve()
        .with_context(|| format!("Unsupported parameter type {}", param.ty))?;
    ty.coerce_str(arg)
        .with_context(|| format!("Cannot coerce `{arg}` to {}", param.ty))
}

/// Encode constructor arguments, to be appended to the creation bytecode.
pub fn encode_constructor(abi: &JsonAbi, args: &[String]) -> anyhow::Result<Vec<u8>> {
    match &abi.constructor {
        Some(constructor) => {
            let values = coerce_args(&constructor.inputs, args)?;
            constructor
                .abi_encode_input(&values)
                .context("Failed to encode constructor arguments")
        }
        None if args.is_empty() => Ok(Vec::new()),
        None => anyhow::bail!("contract has no constructor but {} arguments were given", args.len()),
    }
}

/// Encode calldata for `method`, a name or a full signature such as `setToken(address)`.
pub fn encode_call(abi: &JsonAbi, method: &str, args: &[String]) -> anyhow::Result<Vec<u8>> {
    let function = resolve_function(abi, method, args.len())?;
    let values = coerce_args(&function.inputs, args)?;
    function
        .abi_encode_input(&values)
        .with_context(|| format!("Failed to encode call to {method}"))
}

/// Encode the initializer call a proxy runs on construction.
///
/// Returns empty calldata when the ABI has no such initializer and no arguments are
/// given, in which case the proxy is created without initialization.
pub fn encode_initializer(
    abi: &JsonAbi,
    initializer: &str,
    args: &[String],
) -> anyhow::Result<Vec<u8>> {
    let Some(function) = resolve_initializer(abi, initializer, args.len())? else {
        return Ok(Vec::new());
    };
    let values = coerce_args(&function.inputs, args)?;
    function
        .abi_encode_input(&values)
        .with_context(|| format!("Failed to encode call to {initializer}"))
}

/// Find the initializer taking `arity` arguments, by name or full signature.
///
/// `None` when the ABI declares no such initializer and there is nothing to pass.
pub fn resolve_initializer(
    abi: &JsonAbi,
    initializer: &str,
    arity: usize,
) -> anyhow::Result<Option<Function>> {
    let declared = if initializer.contains('(') {
        abi.functions().any(|f| f.signature() == initializer)
    } else {
        abi.function(initializer).is_some()
    };

    if !declared && arity == 0 {
        return Ok(None);
    }
    resolve_function(abi, initializer, arity).map(Some)
}

fn resolve_function(abi: &JsonAbi, method: &str, arity: usize) -> anyhow::Result<Function> {
    if method.contains('(') {
        if let Some(function) = abi.functions().find(|f| f.signature() == method) {
            return Ok(function.clone());
        }
        return Function::parse(method)
            .map_err(|e| anyhow::anyhow!("Invalid function signature `{method}`: {e}"));
    }

    let candidates: Vec<&Function> = abi
        .function(method)
        .map(|overloads| overloads.iter().filter(|f| f.inputs.len() == arity).collect())
        .unwrap_or_default();

    match candidates.as_slice() {
        [function] => Ok((*function).clone()),
        [] => anyhow::bail!("no function `{method}` taking {arity} arguments"),
        _ => anyhow::bail!("function `{method}` is ambiguous; use its full signature"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abi() -> JsonAbi {
        serde_json::from_str(
            r#"[
                {"type":"constructor","stateMutability":"nonpayable","inputs":[
                    {"name":"token","type":"address"},{"name":"cap","type":"uint256"}]},
                {"type":"function","name":"setToken","stateMutability":"nonpayable","outputs":[],
                 "inputs":[{"name":"token","type":"address"}]},
                {"type":"function","name":"initialize","stateMutability":"nonpayable","outputs":[],
                 "inputs":[{"name":"owner","type":"address"}]}
            ]"#,
        )
        .expect("abi should parse")
    }

    const TOKEN: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    #[test]
    fn test_encode_constructor() {
        let encoded = encode_constructor(&abi(), &[TOKEN.to_string(), "1000".to_string()])
            .expect("constructor should encode");
        assert_eq!(encoded.len(), 64);
        assert_eq!(encoded[63], 0xe8);
        assert_eq!(encoded[62], 0x03);
    }

    #[test]
    fn test_encode_constructor_arity_mismatch() {
        assert!(encode_constructor(&abi(), &[TOKEN.to_string()]).is_err());
        assert!(encode_constructor(&JsonAbi::default(), &[]).unwrap().is_empty());
    }

    #[test]
    fn test_encode_call_by_name_and_signature() {
        let by_name = encode_call(&abi(), "setToken", &[TOKEN.to_string()]).unwrap();
        let by_sig = encode_call(&abi(), "setToken(address)", &[TOKEN.to_string()]).unwrap();

        assert_eq!(by_name, by_sig);
        assert_eq!(by_name.len(), 4 + 32);
    }

    #[test]
    fn test_encode_call_rejects_bad_literal() {
        let err = encode_call(&abi(), "setToken", &["not-an-address".to_string()]).unwrap_err();
        assert!(format!("{err:#}").contains("not-an-address"));
    }

    #[test]
    fn test_missing_initializer_yields_empty_calldata() {
        assert!(encode_initializer(&abi(), "init", &[]).unwrap().is_empty());
        assert!(encode_initializer(&abi(), "init", &["1".to_string()]).is_err());
        assert_eq!(
            encode_initializer(&abi(), "initialize", &[TOKEN.to_string()])
                .unwrap()
                .len(),
            36
        );
    }

    #[test]
    fn test_initializer_by_full_signature() {
        let function = resolve_initializer(&abi(), "initialize(address)", 1)
            .unwrap()
            .expect("initializer is declared");
        assert_eq!(function.inputs.len(), 1);

        let by_sig = encode_initializer(&abi(), "initialize(address)", &[TOKEN.to_string()]).unwrap();
        let by_name = encode_initializer(&abi(), "initialize", &[TOKEN.to_string()]).unwrap();
        assert_eq!(by_sig, by_name);

        assert!(resolve_initializer(&abi(), "init()", 0).unwrap().is_none());
    }
}
