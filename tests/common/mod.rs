//! Common test utilities for statash integration tests

pub use statash::{CommandError, Dataset, Session, Variable};

/// A session holding the given variables
pub fn session_with(vars: Vec<Variable>) -> Session {
    let mut session = Session::new();
    session.set_data(Dataset::from_variables(vars).unwrap());
    session
}

/// Numeric variable from plain values, `None` for missing
pub fn numeric(name: &str, values: &[Option<f64>]) -> Variable {
    Variable::numeric(name, values.to_vec())
}

/// Run a line that must succeed and return its rendered output
pub fn run(session: &mut Session, line: &str) -> String {
    match session.execute(line) {
        Ok(out) => session.render(&out),
        Err(e) => panic!("{} failed: {}", line, e.report()),
    }
}

/// Run a line that must fail
#[allow(dead_code)]
pub fn fail(session: &mut Session, line: &str) -> CommandError {
    match session.execute(line) {
        Ok(out) => panic!("{} succeeded: {}", line, session.render(&out)),
        Err(e) => e,
    }
}

/// Values of a numeric variable
#[allow(dead_code)]
pub fn nums(session: &Session, name: &str) -> Vec<Option<f64>> {
    let column = session.data().column(name).unwrap();
    (0..column.len()).map(|row| column.num(row)).collect()
}
