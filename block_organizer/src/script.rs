use types::{ForkFlags, Transaction, Utxo, ValidationError};

/// The seam to the script interpreter.
///
/// The organizer populates prevouts and fans inputs out across the priority
/// pool; the host supplies the engine that actually executes scripts under
/// the activation flags of the snapshot.
pub trait ScriptVerifier: Send + Sync + 'static {
    fn verify_input(
        &self,
        transaction: &Transaction,
        input_index: usize,
        prevout: &Utxo,
        forks: &ForkFlags,
    ) -> Result<(), ValidationError>;
}

/// Accepts every input. Used by tests and by hosts that trust their block
/// sources, mirroring a null engine seam.
#[derive(Clone, Copy, Default)]
pub struct NullScriptVerifier;

impl ScriptVerifier for NullScriptVerifier {
    fn verify_input(
        &self,
        _transaction: &Transaction,
        _input_index: usize,
        _prevout: &Utxo,
        _forks: &ForkFlags,
    ) -> Result<(), ValidationError> {
        Ok(())
    }
}
