use crate::errors::EngineError;

/// Solana's native-asset sentinel address (the system program ID, used
/// by convention to mean "native SOL" in a token-address slot).
pub const NATIVE_SENTINEL: &str = "11111111111111111111111111111111";

/// Wrapped SOL's SPL mint address — what `normalize` maps the sentinel to.
pub const WRAPPED_NATIVE: &str = "So11111111111111111111111111111111111111112";

fn is_base58_address_shaped(addr: &str) -> bool {
    if addr.len() < 32 || addr.len() > 44 {
        return false;
    }
    bs58::decode(addr).into_vec().is_ok()
}

pub fn validate_address_shape(addr: &str) -> Result<(), EngineError> {
    if !is_base58_address_shaped(addr) {
        return Err(EngineError::Validation(format!(
            "address '{addr}' is not a valid base58 token address"
        )));
    }
    Ok(())
}

/// Maps the native-asset sentinel to its wrapped equivalent; identity otherwise.
pub fn normalize(addr: &str) -> String {
    if addr == NATIVE_SENTINEL {
        WRAPPED_NATIVE.to_string()
    } else {
        addr.to_string()
    }
}

/// Fails when `tokenIn == tokenOut` pre-normalization, or when both
/// normalize to the same underlying asset (native vs. its own wrapped form).
pub fn validate_pair(token_in: &str, token_out: &str) -> Result<(), EngineError> {
    if token_in == token_out {
        return Err(EngineError::Validation(
            "tokenIn and tokenOut are identical".to_string(),
        ));
    }
    if normalize(token_in) == normalize(token_out) {
        return Err(EngineError::Validation(
            "tokenIn and tokenOut normalize to the same asset".to_string(),
        ));
    }
    Ok(())
}

/// Normalization outcome carrying wrap/unwrap instructions and the
/// addresses to hand to the Router/Venue Driver.
#[derive(Debug, Clone)]
pub struct WrapInstructions {
    pub needs_wrap_in: bool,
    pub needs_unwrap_out: bool,
    pub wrap_amount: rust_decimal::Decimal,
    pub normalized_in: String,
    pub normalized_out: String,
}

pub fn wrap_instructions(
    token_in: &str,
    token_out: &str,
    amount: rust_decimal::Decimal,
) -> WrapInstructions {
    WrapInstructions {
        needs_wrap_in: token_in == NATIVE_SENTINEL,
        needs_unwrap_out: token_out == NATIVE_SENTINEL,
        wrap_amount: amount,
        normalized_in: normalize(token_in),
        normalized_out: normalize(token_out),
    }
}
