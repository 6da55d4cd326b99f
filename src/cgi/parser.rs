//! Translating CGI/1.1 response documents into HTTP responses
//!
//! A script prints header lines, a blank line, then the body. The status
//! travels as a `Status` header, which is ours to consume and never reaches
//! the client.

use crate::codec::{self, Headers};
use crate::errors::{Error, Result};
use crate::server::response::Response;

use nom::character::complete::{digit1, space0};
use nom::sequence::preceded;
use nom::IResult;

use std::str::FromStr;

/// The leading code of a `Status` value, e.g. `404` in `"404 Not Found"`
fn code(input: &str) -> IResult<&str, &str> {
    preceded(space0, digit1)(input)
}

fn status_code(value: &str) -> Result<u16> {
    match code(value) {
        Ok((_, digits)) => u16::from_str(digits).map_err(|_| Error::BadGateway),
        Err(_) => Err(Error::BadGateway)
    }
}

/// Picks the response status out of the script's headers, removing the
/// `Status` pseudo-header.
///
/// A `Location` without a `Status` is a client redirect.
fn take_status(headers: &mut Headers) -> Result<u16> {
    match headers.remove("Status") {
        Some(value) => status_code(&value),
        None if headers.contains("Location") => Ok(302),
        None => Ok(200)
    }
}

/// Turns everything a script wrote into a response.
///
/// Fails with `BadGateway` if the output has no blank line ending its
/// headers, if a header line is malformed, or if the status isn't a number.
pub fn translate(output: &[u8]) -> Result<Response> {
    let (head_len, body_start) = match codec::find_head_end(output) {
        Some(bounds) => bounds,
        None => return Err(Error::BadGateway)
    };

    let mut headers = match codec::parse_headers(&output[.. head_len]) {
        Ok(h) => h,
        Err(e) => {
            warn!("CGI script sent bad headers: {}", e);
            return Err(Error::BadGateway);
        }
    };

    let status = take_status(&mut headers)?;

    Ok(Response::new(status, headers, output[body_start ..].to_vec()))
}
