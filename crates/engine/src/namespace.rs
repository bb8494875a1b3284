use proto::{error_codes, RemoteException};

/// The empty string is reserved and rejected — every other namespace is
/// created implicitly on first access.
pub fn validate(namespace: &str) -> Result<(), RemoteException> {
    if namespace.is_empty() {
        return Err(RemoteException::new(
            error_codes::EMPTY_NAMESPACE,
            "namespace must not be empty",
        ));
    }
    Ok(())
}
