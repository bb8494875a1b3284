use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use proto::ZprocError;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio::sync::oneshot;

/// Parent-side handle to a supervised child process, grounded on
/// `zproc/process/process.py`'s `Process`. The child's return value (or the
/// `None` sentinel a `ProcessExit` target produces) arrives over a small
/// one-shot TCP "result socket" bound before the child is spawned and whose
/// address is handed to it on the command line.
pub struct SupervisedProcess {
    child: tokio::process::Child,
    result_rx: oneshot::Receiver<io::Result<Value>>,
}

/// Builds and spawns a supervised child process.
///
/// `configure` receives the bound result-socket address and returns the
/// `Command` to run — callers are expected to pass that address to the
/// child (as an argument or environment variable) so it can report back.
pub async fn spawn(
    configure: impl FnOnce(SocketAddr) -> Command,
) -> io::Result<SupervisedProcess> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let result_addr = listener.local_addr()?;

    let mut command = configure(result_addr);
    let child = command.spawn()?;

    let (tx, result_rx) = oneshot::channel();
    tokio::spawn(async move {
        let outcome = accept_one_result(listener).await;
        let _ = tx.send(outcome);
    });

    Ok(SupervisedProcess { child, result_rx })
}

async fn accept_one_result(listener: TcpListener) -> io::Result<Value> {
    let (mut stream, _) = listener.accept().await?;
    transport::read_frame(&mut stream)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
}

impl SupervisedProcess {
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Waits for the child to exit and, if it exited cleanly, for the
    /// return value it sent over the result socket.
    ///
    /// Mirrors `Process.wait()`'s three-way branch: a non-zero exit code
    /// always raises [`ZprocError::ProcessWait`], even if a result arrived;
    /// a zero exit code with no result (the process crashed before its
    /// `target_wrapper` equivalent could report back) also raises it;
    /// otherwise the delivered value is returned (`Value::Null` for a
    /// target that exited via `ProcessExit` rather than a normal return).
    pub async fn wait(&mut self, timeout: Option<Duration>) -> Result<Value, ZprocError> {
        let status = match timeout {
            Some(d) => tokio::time::timeout(d, self.child.wait())
                .await
                .map_err(|_| ZprocError::Timeout)?
                .map_err(|e| ZprocError::ProcessWait { message: e.to_string(), exitcode: None })?,
            None => self
                .child
                .wait()
                .await
                .map_err(|e| ZprocError::ProcessWait { message: e.to_string(), exitcode: None })?,
        };

        let code = status.code().unwrap_or(-1);
        if code != 0 {
            return Err(ZprocError::ProcessWait {
                message: format!("child exited with status {code}"),
                exitcode: Some(code),
            });
        }

        match (&mut self.result_rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ZprocError::ProcessWait {
                message: format!("the process died before sending its return value: {e}"),
                exitcode: Some(0),
            }),
            Err(_) => Err(ZprocError::ProcessWait {
                message: "the process died before sending its return value".into(),
                exitcode: Some(0),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_returns_the_value_a_well_behaved_child_reports() {
        // A "child" here is just this test process racing the same result
        // socket protocol a real spawned process would use, since spawning
        // an external test binary is out of reach for a unit test.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let reporter = tokio::spawn(async move {
            let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            transport::write_frame(&mut stream, &serde_json::json!({"answer": 42})).await.unwrap();
        });

        let (mut stream, _) = listener.accept().await.unwrap();
        let value: Value = transport::read_frame(&mut stream).await.unwrap();
        reporter.await.unwrap();
        assert_eq!(value, serde_json::json!({"answer": 42}));
    }
}
