use std::ffi::{CStr, CString};
use std::os::raw::c_int;
use std::path::Path;

use crate::{AccessMode, Error, Result, Statement, statement::Value};

const BUSY_TIMEOUT_MS: c_int = 5000;

pub struct Connection {
    db: *mut libsqlite3_sys::sqlite3,
}

// The raw handle is only ever used behind the owning driver's mutex; sqlite
// itself is built in serialized threading mode.
unsafe impl Send for Connection {}

impl Connection {
    pub fn open(db_path: &Path, mode: AccessMode) -> Result<Self> {
        let mut db: *mut libsqlite3_sys::sqlite3 = std::ptr::null_mut();
        let c_path = CString::new(db_path.to_string_lossy().to_string())?;
        let flags = match mode {
            AccessMode::ReadOnly => libsqlite3_sys::SQLITE_OPEN_READONLY,
            AccessMode::ReadWrite => libsqlite3_sys::SQLITE_OPEN_READWRITE,
            AccessMode::Create => libsqlite3_sys::SQLITE_OPEN_READWRITE | libsqlite3_sys::SQLITE_OPEN_CREATE,
        };

        let rc = unsafe { libsqlite3_sys::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, std::ptr::null()) };
        if rc != libsqlite3_sys::SQLITE_OK {
            let message = last_error_message(db);
            unsafe { libsqlite3_sys::sqlite3_close(db) };
            return Err(Error::Database(message));
        }

        unsafe { libsqlite3_sys::sqlite3_busy_timeout(db, BUSY_TIMEOUT_MS) };

        Ok(Self { db })
    }

    pub fn prepare(&self, sql: &str) -> Result<Statement<'_>> {
        let mut stmt: *mut libsqlite3_sys::sqlite3_stmt = std::ptr::null_mut();
        let c_sql = CString::new(sql)?;
        let rc = unsafe { libsqlite3_sys::sqlite3_prepare_v2(self.db, c_sql.as_ptr(), -1, &mut stmt, std::ptr::null_mut()) };
        if rc != libsqlite3_sys::SQLITE_OK {
            return Err(Error::Database(self.last_error()));
        }

        Ok(Statement::new(stmt))
    }

    /// Run a single statement to completion with the given bind values.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result {
        let mut stmt = self.prepare(sql)?;
        stmt.bind_all(params)?;
        while stmt.step()? {}
        Ok(())
    }

    /// Run a semicolon separated batch of parameterless statements.
    pub fn execute_batch(&self, sql: &str) -> Result {
        for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty() && !s.starts_with("--")) {
            self.execute(statement, &[])?;
        }
        Ok(())
    }

    /// Number of rows changed by the most recent INSERT/UPDATE/DELETE.
    pub fn changes(&self) -> usize {
        unsafe { libsqlite3_sys::sqlite3_changes(self.db) as usize }
    }

    pub fn last_error(&self) -> String {
        last_error_message(self.db)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        unsafe { libsqlite3_sys::sqlite3_close(self.db) };
    }
}

fn last_error_message(db: *mut libsqlite3_sys::sqlite3) -> String {
    let message = unsafe { libsqlite3_sys::sqlite3_errmsg(db) };
    let c_str = unsafe { CStr::from_ptr(message) };
    c_str.to_string_lossy().into_owned()
}
