//! Token registration pass
//!
//! Reads a `chain,tokenAddress` CSV and registers each token on the bridge
//! contract of the named chain: `register(token)` on the source side,
//! `createWrappedToken(token, name, symbol)` on the destination side. Every
//! row is validated before the first transaction is sent.

use alloy::primitives::Address;
use eyre::{Result, WrapErr};
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};

use twinbridge_core::evm::{
    AccountContext, BridgeCall, SubmissionError, SubmissionOutcome, TxSubmitter,
};
use twinbridge_core::types::parse_address;
use twinbridge_core::{BindingError, ChainSide};

use crate::metrics;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("line {line}: expected 'chain,tokenAddress', got '{content}'")]
    MalformedRow { line: usize, content: String },

    #[error("line {line}: {source}")]
    BadAddress {
        line: usize,
        #[source]
        source: BindingError,
    },

    #[error("line {line}: chain '{chain}' is neither '{source_chain}' nor '{destination_chain}'")]
    UnknownChain {
        line: usize,
        chain: String,
        source_chain: String,
        destination_chain: String,
    },
}

/// One validated CSV row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRow {
    /// 1-based line number in the input
    pub line: usize,
    pub chain: String,
    pub token: Address,
}

/// Parse the registration CSV; a leading `chain,...` header is skipped
pub fn parse_registration_csv(contents: &str) -> Result<Vec<RegistrationRow>, RegistrationError> {
    let mut rows = Vec::new();
    for (idx, raw) in contents.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }

        let fields: Vec<&str> = trimmed.split(',').map(str::trim).collect();
        if rows.is_empty() && fields[0].eq_ignore_ascii_case("chain") {
            continue;
        }
        let [chain, token] = fields.as_slice() else {
            return Err(RegistrationError::MalformedRow {
                line,
                content: trimmed.to_string(),
            });
        };
        if chain.is_empty() {
            return Err(RegistrationError::MalformedRow {
                line,
                content: trimmed.to_string(),
            });
        }

        rows.push(RegistrationRow {
            line,
            chain: chain.to_string(),
            token: parse_address(token)
                .map_err(|source| RegistrationError::BadAddress { line, source })?,
        });
    }
    Ok(rows)
}

/// Read and parse the registration file; a missing file is an error
pub fn load_registration_file(path: &Path) -> Result<Vec<RegistrationRow>> {
    let contents = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read registration file {}", path.display()))?;
    parse_registration_csv(&contents)
        .wrap_err_with(|| format!("Invalid registration file {}", path.display()))
}

/// `Wrapped 0x1234…abcd`
pub fn wrapped_name(token: Address) -> String {
    let full = format!("0x{}", hex::encode(token));
    format!("Wrapped {}…{}", &full[..6], &full[full.len() - 4..])
}

/// `W` followed by the first four hex digits of the address
pub fn wrapped_symbol(token: Address) -> String {
    format!("W{}", hex::encode_upper(&token.as_slice()[..2]))
}

/// Turn validated rows into calls, rejecting rows for unknown chains
pub fn plan_registrations(
    rows: &[RegistrationRow],
    source_chain: &str,
    destination_chain: &str,
) -> Result<Vec<(ChainSide, BridgeCall)>, RegistrationError> {
    rows.iter()
        .map(|row| {
            if row.chain == source_chain {
                Ok((ChainSide::Source, BridgeCall::Register { token: row.token }))
            } else if row.chain == destination_chain {
                Ok((
                    ChainSide::Destination,
                    BridgeCall::CreateWrappedToken {
                        underlying: row.token,
                        name: wrapped_name(row.token),
                        symbol: wrapped_symbol(row.token),
                    },
                ))
            } else {
                Err(RegistrationError::UnknownChain {
                    line: row.line,
                    chain: row.chain.clone(),
                    source_chain: source_chain.to_string(),
                    destination_chain: destination_chain.to_string(),
                })
            }
        })
        .collect()
}

/// Result of one registration call
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    pub side: ChainSide,
    pub call: BridgeCall,
    pub result: Result<SubmissionOutcome, SubmissionError>,
}

/// Submit every planned registration in file order
///
/// A failed row is logged and the pass moves on.
pub async fn run_registrations(
    plan: Vec<(ChainSide, BridgeCall)>,
    source: &dyn TxSubmitter,
    destination: &dyn TxSubmitter,
    ctx: &AccountContext,
) -> Vec<RegistrationResult> {
    let mut results = Vec::with_capacity(plan.len());
    for (side, call) in plan {
        let submitter = match side {
            ChainSide::Source => source,
            ChainSide::Destination => destination,
        };
        let result = submitter.submit(ctx, &call).await;
        match &result {
            Ok(outcome) => {
                metrics::record_submission(submitter.chain_name(), call.function_name(), outcome.status());
                info!(
                    chain = %submitter.chain_name(),
                    call = %call,
                    tx_hash = %outcome.tx_hash(),
                    status = outcome.status(),
                    "Registration submitted"
                );
            }
            Err(e) => {
                metrics::record_submission(submitter.chain_name(), call.function_name(), "failed");
                error!(
                    chain = %submitter.chain_name(),
                    call = %call,
                    error = %e,
                    "Registration failed"
                );
            }
        }
        results.push(RegistrationResult { side, call, result });
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinbridge_core::evm::Account;
    use twinbridge_core::testing::RecordingSubmitter;

    const TOKEN_A: &str = "0xabcdef0000000000000000000000000000001234";
    const TOKEN_B: &str = "0x1111110000000000000000000000000000005678";

    #[test]
    fn test_parse_with_and_without_header() {
        let csv = format!("chain,tokenAddress\navax,{}\n\nbsc,{}\n", TOKEN_A, TOKEN_B);
        let rows = parse_registration_csv(&csv).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].line, 2);
        assert_eq!(rows[1].chain, "bsc");

        let rows = parse_registration_csv(&format!("avax,{}", TOKEN_A)).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_malformed_rows_rejected() {
        let err = parse_registration_csv(&format!("avax,{},extra", TOKEN_A)).unwrap_err();
        assert!(matches!(err, RegistrationError::MalformedRow { line: 1, .. }));

        let err = parse_registration_csv("avax,0x1234").unwrap_err();
        assert!(matches!(err, RegistrationError::BadAddress { line: 1, .. }));

        let err = parse_registration_csv(&format!(",{}", TOKEN_A)).unwrap_err();
        assert!(matches!(err, RegistrationError::MalformedRow { .. }));
    }

    #[test]
    fn test_wrapped_name_and_symbol() {
        let token: Address = TOKEN_A.parse().unwrap();
        assert_eq!(wrapped_name(token), "Wrapped 0xabcd…1234");
        assert_eq!(wrapped_symbol(token), "WABCD");
    }

    #[test]
    fn test_unknown_chain_rejected_before_submission() {
        let csv = format!("avax,{}\neth,{}", TOKEN_A, TOKEN_B);
        let rows = parse_registration_csv(&csv).unwrap();
        let err = plan_registrations(&rows, "avax", "bsc").unwrap_err();
        assert!(matches!(err, RegistrationError::UnknownChain { line: 2, .. }));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_registration_file(&dir.path().join("tokens.csv")).is_err());
    }

    #[tokio::test]
    async fn test_rows_routed_to_their_chain() {
        let csv = format!("avax,{}\nbsc,{}", TOKEN_A, TOKEN_B);
        let rows = parse_registration_csv(&csv).unwrap();
        let plan = plan_registrations(&rows, "avax", "bsc").unwrap();

        let source = RecordingSubmitter::new("avax");
        let destination = RecordingSubmitter::new("bsc");
        let ctx = AccountContext::new(Account::random());
        let results = run_registrations(plan, &source, &destination, &ctx).await;

        assert!(results.iter().all(|r| r.result.is_ok()));
        assert_eq!(
            source.calls()[0].call,
            BridgeCall::Register {
                token: TOKEN_A.parse().unwrap()
            }
        );
        match &destination.calls()[0].call {
            BridgeCall::CreateWrappedToken { underlying, symbol, .. } => {
                assert_eq!(*underlying, TOKEN_B.parse::<Address>().unwrap());
                assert_eq!(symbol, "W1111");
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_row_does_not_stop_pass() {
        let csv = format!("avax,{}\navax,{}", TOKEN_A, TOKEN_B);
        let plan = plan_registrations(&parse_registration_csv(&csv).unwrap(), "avax", "bsc").unwrap();

        let source = RecordingSubmitter::new("avax");
        source.fail_with(SubmissionError::Broadcast {
            function: "register".to_string(),
            reason: "execution reverted".to_string(),
        });
        let destination = RecordingSubmitter::new("bsc");
        let ctx = AccountContext::new(Account::random());
        let results = run_registrations(plan, &source, &destination, &ctx).await;

        assert_eq!(results.len(), 2);
        assert_eq!(source.calls().len(), 2);
    }
}
