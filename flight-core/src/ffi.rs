//! C ABI for hosts that link flight-core as a static library (Android NDK, C/C++ shells).
//! Only the pure pieces are exported: name derivation and port selection. Such hosts run their
//! own sockets and discovery and keep the engine's naming and port rules through these calls.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

use crate::identity::{derive_name, Clock, SystemClock, DERIVED_NAME_LEN};
use crate::ports::{pick_port, PortRange};

/// Write `text` plus a NUL terminator into `out_buf`. Returns bytes written (without NUL) or -1.
fn copy_out(text: &str, out_buf: *mut u8, out_len: usize) -> c_int {
    if out_buf.is_null() || out_len < text.len() + 1 {
        return -1;
    }
    unsafe {
        out_buf.copy_from_nonoverlapping(text.as_ptr(), text.len());
        *out_buf.add(text.len()) = 0;
    }
    text.len() as c_int
}

fn read_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Length of a derived service name, so hosts can size buffers.
#[no_mangle]
pub extern "C" fn flight_core_derived_name_len() -> usize {
    DERIVED_NAME_LEN
}

/// Derive the service name for `raw` in `year_month` ("YYYY-MM"). Both are NUL-terminated UTF-8.
/// Writes the name and a NUL into out_buf. Returns bytes written, or -1 on null/invalid input or
/// a short buffer.
#[no_mangle]
pub extern "C" fn flight_core_derive_name(
    raw: *const c_char,
    year_month: *const c_char,
    out_buf: *mut u8,
    out_len: usize,
) -> c_int {
    let (Some(raw), Some(year_month)) = (read_str(raw), read_str(year_month)) else {
        return -1;
    };
    copy_out(&derive_name(raw, year_month), out_buf, out_len)
}

/// Current UTC "YYYY-MM" into out_buf (needs 8 bytes). Returns bytes written or -1.
#[no_mangle]
pub extern "C" fn flight_core_current_year_month(out_buf: *mut u8, out_len: usize) -> c_int {
    copy_out(&SystemClock.year_month(), out_buf, out_len)
}

/// Random port in `[low, high)`, or -1 if the range is empty or starts at 0.
#[no_mangle]
pub extern "C" fn flight_core_pick_port(low: u16, high: u16) -> c_int {
    match pick_port(low, high) {
        Ok(port) => c_int::from(port),
        Err(_) => -1,
    }
}

/// 1 if `port` lies in `[low, high)`, 0 if not, -1 if the range is invalid.
#[no_mangle]
pub extern "C" fn flight_core_port_in_range(port: u16, low: u16, high: u16) -> c_int {
    match PortRange::new(low, high) {
        Ok(range) => c_int::from(range.contains(port)),
        Err(_) => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn derive_name_through_c_abi() {
        let raw = CString::new("P211199V00225").unwrap();
        let ym = CString::new("2024-01").unwrap();
        let mut buf = [0u8; 16];
        let n = flight_core_derive_name(raw.as_ptr(), ym.as_ptr(), buf.as_mut_ptr(), buf.len());
        assert_eq!(n, 6);
        assert_eq!(&buf[..7], b"ba524b\0");
    }

    #[test]
    fn derive_name_rejects_null_and_short_buffer() {
        let ym = CString::new("2024-01").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(
            flight_core_derive_name(std::ptr::null(), ym.as_ptr(), buf.as_mut_ptr(), buf.len()),
            -1
        );
        let raw = CString::new("x").unwrap();
        assert_eq!(flight_core_derive_name(raw.as_ptr(), ym.as_ptr(), buf.as_mut_ptr(), 6), -1);
        assert_eq!(flight_core_derived_name_len(), 6);
    }

    #[test]
    fn year_month_shape() {
        let mut buf = [0u8; 8];
        assert_eq!(flight_core_current_year_month(buf.as_mut_ptr(), buf.len()), 7);
        assert_eq!(buf[4], b'-');
        assert_eq!(buf[7], 0);
    }

    #[test]
    fn port_helpers() {
        let p = flight_core_pick_port(10_000, 50_000);
        assert!((10_000..50_000).contains(&p));
        assert_eq!(flight_core_pick_port(5, 5), -1);
        assert_eq!(flight_core_port_in_range(10_000, 10_000, 50_000), 1);
        assert_eq!(flight_core_port_in_range(50_000, 10_000, 50_000), 0);
        assert_eq!(flight_core_port_in_range(1, 0, 50_000), -1);
    }
}
