//! Helpers for the raw `gdal_sys` calls the safe bindings do not cover.

use std::ffi::CStr;

use crate::{Error, Result};

pub(crate) const FALSE: std::ffi::c_int = 0;

fn last_cpl_error() -> String {
    let msg = unsafe { CStr::from_ptr(gdal_sys::CPLGetLastErrorMsg()) };
    msg.to_string_lossy().into_owned()
}

pub(crate) fn check_rc(rc: gdal_sys::CPLErr::Type) -> Result {
    if rc != gdal_sys::CPLErr::CE_None {
        return Err(Error::Runtime(last_cpl_error()));
    }

    Ok(())
}

pub(crate) fn check_pointer<T>(ptr: *mut T, context: &str) -> Result<*mut T> {
    if ptr.is_null() {
        return Err(Error::Runtime(format!("{}: {}", context, last_cpl_error())));
    }

    Ok(ptr)
}
