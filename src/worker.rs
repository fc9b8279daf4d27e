//! Running a session on a background thread
//!
//! The worker owns the `Session`; callers send command lines over a
//! channel and get each result back on a reply channel. Commands run one
//! at a time in the order they were submitted. `cancel` interrupts the
//! running command through the session's `CancelToken`.

use crate::display::Output;
use crate::error::CommandError;
use crate::session::Session;
use crate::signals::CancelToken;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::{self, JoinHandle};

type Reply = Result<Output, CommandError>;

struct Job {
    line: String,
    reply: Sender<Reply>,
}

pub struct SessionWorker {
    jobs: Option<Sender<Job>>,
    handle: Option<JoinHandle<Session>>,
    cancel: CancelToken,
}

fn stopped() -> CommandError {
    CommandError::state("session worker has stopped")
}

impl SessionWorker {
    /// Move `session` onto its own thread
    pub fn spawn(mut session: Session) -> SessionWorker {
        let cancel = session.cancel_token();
        let (jobs, queue) = channel::<Job>();
        let handle = thread::spawn(move || {
            for job in queue {
                let result = session.execute(&job.line);
                // the caller may have stopped waiting
                let _ = job.reply.send(result);
            }
            tracing::debug!("session worker finished");
            session
        });
        SessionWorker { jobs: Some(jobs), handle: Some(handle), cancel }
    }

    /// Queue a line; the result arrives on the returned receiver
    pub fn submit(&self, line: &str) -> Result<Receiver<Reply>, CommandError> {
        let (reply, result) = channel();
        let jobs = self.jobs.as_ref().ok_or_else(stopped)?;
        jobs.send(Job { line: line.to_string(), reply }).map_err(|_| stopped())?;
        Ok(result)
    }

    /// Run a line and wait for its result
    pub fn execute(&self, line: &str) -> Result<Output, CommandError> {
        self.submit(line)?.recv().map_err(|_| stopped())?
    }

    /// Interrupt the running command
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Finish the queued commands and hand the session back
    pub fn shutdown(mut self) -> Option<Session> {
        self.jobs = None;
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(session) => Some(session),
            Err(_) => {
                tracing::error!("session worker panicked");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Dataset, Variable};

    #[test]
    fn commands_run_in_order() {
        let mut session = Session::new();
        session.set_data(Dataset::from_variables(vec![Variable::numeric("x", vec![Some(1.0), Some(2.0)])]).unwrap());
        let worker = SessionWorker::spawn(session);
        let first = worker.submit("generate y = x * 2").unwrap();
        let second = worker.submit("replace y = y + 1").unwrap();
        assert!(first.recv().unwrap().is_ok());
        assert!(second.recv().unwrap().is_ok());
        assert_eq!(worker.execute("frobnicate").unwrap_err().code, 199);

        let session = worker.shutdown().unwrap();
        assert_eq!(session.data().value("y", 1).unwrap(), crate::ast::Value::Num(5.0));
    }
}
