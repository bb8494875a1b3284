/// Maps the signal names accepted in a `retry_for` list to a
/// [`tokio::signal::unix::SignalKind`]. Unknown names (and every name, on
/// non-Unix targets) return `None`; callers simply skip installing a
/// handler for those and the signal is left to its default disposition.
#[cfg(unix)]
pub fn signal_kind_from_name(name: &str) -> Option<tokio::signal::unix::SignalKind> {
    use tokio::signal::unix::SignalKind;
    match name {
        "SIGTERM" => Some(SignalKind::terminate()),
        "SIGINT" => Some(SignalKind::interrupt()),
        "SIGHUP" => Some(SignalKind::hangup()),
        "SIGQUIT" => Some(SignalKind::quit()),
        "SIGUSR1" => Some(SignalKind::user_defined1()),
        "SIGUSR2" => Some(SignalKind::user_defined2()),
        _ => None,
    }
}

#[cfg(not(unix))]
pub fn signal_kind_from_name(_name: &str) -> Option<()> {
    None
}
