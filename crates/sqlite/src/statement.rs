use std::ffi::{CStr, CString, c_char, c_int};
use std::marker::PhantomData;

use crate::{Error, Result};

/// Owned bind value for a statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// Prepared statement bound to the lifetime of its connection.
///
/// Column getters return owned data so no row handle can outlive a `step`.
pub struct Statement<'conn> {
    stmt: *mut libsqlite3_sys::sqlite3_stmt,
    _conn: PhantomData<&'conn crate::Connection>,
}

impl<'conn> Statement<'conn> {
    pub(crate) fn new(stmt: *mut libsqlite3_sys::sqlite3_stmt) -> Self {
        Self { stmt, _conn: PhantomData }
    }

    /// Bind all parameters in order, starting at index 1.
    pub fn bind_all(&mut self, params: &[Value]) -> Result {
        for (i, param) in params.iter().enumerate() {
            self.bind(i as c_int + 1, param)?;
        }
        Ok(())
    }

    pub fn bind(&mut self, index: c_int, value: &Value) -> Result {
        let rc = match value {
            Value::Null => unsafe { libsqlite3_sys::sqlite3_bind_null(self.stmt, index) },
            Value::Integer(v) => unsafe { libsqlite3_sys::sqlite3_bind_int64(self.stmt, index, *v) },
            Value::Real(v) => unsafe { libsqlite3_sys::sqlite3_bind_double(self.stmt, index, *v) },
            Value::Text(v) => {
                let c_str = CString::new(v.as_str())?;
                unsafe {
                    libsqlite3_sys::sqlite3_bind_text(self.stmt, index, c_str.as_ptr(), -1, libsqlite3_sys::SQLITE_TRANSIENT())
                }
            }
            Value::Blob(v) => unsafe {
                libsqlite3_sys::sqlite3_bind_blob(
                    self.stmt,
                    index,
                    v.as_ptr().cast::<std::ffi::c_void>(),
                    v.len() as c_int,
                    libsqlite3_sys::SQLITE_TRANSIENT(),
                )
            },
        };

        self.check_rc(rc)
    }

    /// Advance to the next row. `Ok(true)` while a row is available.
    pub fn step(&mut self) -> Result<bool> {
        match unsafe { libsqlite3_sys::sqlite3_step(self.stmt) } {
            libsqlite3_sys::SQLITE_ROW => Ok(true),
            libsqlite3_sys::SQLITE_DONE => Ok(false),
            _ => Err(Error::Database(self.error_message())),
        }
    }

    pub fn reset(&mut self) -> Result {
        let rc = unsafe { libsqlite3_sys::sqlite3_reset(self.stmt) };
        self.check_rc(rc)
    }

    pub fn column_is_null(&self, index: c_int) -> bool {
        unsafe { libsqlite3_sys::sqlite3_column_type(self.stmt, index) == libsqlite3_sys::SQLITE_NULL }
    }

    pub fn column_text(&self, index: c_int) -> Result<Option<String>> {
        let data = unsafe { libsqlite3_sys::sqlite3_column_text(self.stmt, index) };
        if data.is_null() {
            return Ok(None);
        }

        let c_str = unsafe { CStr::from_ptr(data.cast::<c_char>()) };
        match c_str.to_str() {
            Ok(s) => Ok(Some(s.to_string())),
            Err(_) => Err(Error::Database(format!("Column {} holds invalid utf-8", index))),
        }
    }

    pub fn column_blob(&self, index: c_int) -> Option<Vec<u8>> {
        let data = unsafe { libsqlite3_sys::sqlite3_column_blob(self.stmt, index) };
        let size = unsafe { libsqlite3_sys::sqlite3_column_bytes(self.stmt, index) };
        if data.is_null() || size <= 0 {
            return None;
        }

        let bytes = unsafe { std::slice::from_raw_parts(data.cast::<u8>(), size as usize) };
        Some(bytes.to_vec())
    }

    pub fn column_f64(&self, index: c_int) -> f64 {
        unsafe { libsqlite3_sys::sqlite3_column_double(self.stmt, index) }
    }

    pub fn column_i64(&self, index: c_int) -> i64 {
        unsafe { libsqlite3_sys::sqlite3_column_int64(self.stmt, index) }
    }

    fn error_message(&self) -> String {
        let message = unsafe { libsqlite3_sys::sqlite3_errmsg(libsqlite3_sys::sqlite3_db_handle(self.stmt)) };
        let c_str = unsafe { CStr::from_ptr(message) };
        c_str.to_string_lossy().into_owned()
    }

    fn check_rc(&self, rc: c_int) -> Result {
        if rc != libsqlite3_sys::SQLITE_OK {
            return Err(Error::Database(self.error_message()));
        }
        Ok(())
    }
}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        unsafe { libsqlite3_sys::sqlite3_finalize(self.stmt) };
    }
}
