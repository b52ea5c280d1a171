//! Move-semantics payloads and the call-argument model.
//!
//! A [`Transfer`] hands its byte buffers to the receiving worker by move
//! instead of copy. It must be the sole argument of a call; mixing it with
//! positional values is a usage error caught before any dispatch.

use serde_json::Value;

use crate::error::CallError;

/// A payload whose buffers are moved, not copied, to the receiving worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// Structured value describing the buffers (shape, lengths, metadata).
    pub value: Value,
    /// The buffers themselves; ownership moves with the message.
    pub buffers: Vec<Vec<u8>>,
}

impl Transfer {
    pub fn new(value: Value, buffers: Vec<Vec<u8>>) -> Self {
        Self { value, buffers }
    }
}

/// One positional argument of a call.
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Value),
    Transfer(Transfer),
}

/// The arguments of a single invocation.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    args: Vec<Arg>,
}

impl CallArgs {
    /// Plain positional JSON arguments.
    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            args: values.into_iter().map(Arg::Value).collect(),
        }
    }

    /// A single move-semantics argument.
    pub fn transfer(transfer: Transfer) -> Self {
        Self {
            args: vec![Arg::Transfer(transfer)],
        }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Enforce the transfer convention: a `Transfer` must be the only
    /// argument. Checked synchronously at invocation time.
    pub fn validate(&self) -> Result<(), CallError> {
        let transfers = self
            .args
            .iter()
            .filter(|arg| matches!(arg, Arg::Transfer(_)))
            .count();
        if transfers > 0 && self.args.len() > 1 {
            return Err(CallError::InvalidTransfer);
        }
        Ok(())
    }

    /// Split into wire values and the buffers to move alongside them.
    /// Callers must `validate()` first.
    pub fn into_wire(self) -> (Vec<Value>, Vec<Vec<u8>>) {
        let mut values = Vec::with_capacity(self.args.len());
        let mut buffers = Vec::new();
        for arg in self.args {
            match arg {
                Arg::Value(value) => values.push(value),
                Arg::Transfer(transfer) => {
                    values.push(transfer.value);
                    buffers.extend(transfer.buffers);
                }
            }
        }
        (values, buffers)
    }
}

impl From<Vec<Value>> for CallArgs {
    fn from(values: Vec<Value>) -> Self {
        CallArgs::positional(values)
    }
}

impl From<Transfer> for CallArgs {
    fn from(transfer: Transfer) -> Self {
        CallArgs::transfer(transfer)
    }
}

impl From<Vec<Arg>> for CallArgs {
    fn from(args: Vec<Arg>) -> Self {
        Self { args }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn positional_args_validate() {
        let args = CallArgs::positional(vec![json!(1), json!(2)]);
        assert!(args.validate().is_ok());
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn sole_transfer_validates() {
        let args = CallArgs::transfer(Transfer::new(json!({"len": 3}), vec![vec![1, 2, 3]]));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn transfer_mixed_with_values_is_rejected() {
        let args: CallArgs = vec![
            Arg::Transfer(Transfer::new(json!(null), vec![vec![0]])),
            Arg::Value(json!(1)),
        ]
        .into();
        assert!(matches!(args.validate(), Err(CallError::InvalidTransfer)));
    }

    #[test]
    fn into_wire_moves_buffers() {
        let args = CallArgs::transfer(Transfer::new(json!({"n": 1}), vec![vec![9, 9]]));
        let (values, buffers) = args.into_wire();
        assert_eq!(values, vec![json!({"n": 1})]);
        assert_eq!(buffers, vec![vec![9, 9]]);
    }
}
