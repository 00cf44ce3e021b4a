//! Parser for Quectel `AT+QENG` tower query responses.
//!
//! This module uses the `nom` parsing library to turn single lines of modem
//! output into typed tower records. A line either yields a complete record or
//! an error; a record is never partially filled in.
//!
//! # Response Formats
//!
//! Serving cell (`AT+QENG="servingcell"`):
//! ```text
//! +QENG: "servingcell",<state>,"LTE",<is_tdd>,<mcc>,<mnc>,<cellid>,<pcid>,<earfcn>,<band>,<ul_bw>,<dl_bw>,<tac>,<rsrp>,...
//! +QENG: "servingcell","NOCONN","LTE","FDD",262,02,1A2B3C,5,5,1,1,1,64,-95
//! ```
//!
//! Neighbor cells (`AT+QENG="neighbourcell"`), one line per cell:
//! ```text
//! +QENG: "neighbourcell intra","LTE",<earfcn>,<pcid>,<rsrq>,<rsrp>,<rssi>,...
//! +QENG: "neighbourcell intra","LTE",6300,128,-11,-101,-72,0,20,7,-,-,-,-
//! ```
//!
//! The signal quality (`AT+QCSQ`) and registration (`AT+CEREG?`) responses
//! used by the TCP modem transport are parsed here as well.

use std::str::FromStr;

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1, hex_digit1, space0},
    combinator::{map_res, opt, recognize},
    multi::count,
    sequence::{delimited, preceded, terminated},
};
use thiserror::Error;

use crate::tower::{NeighborCell, RadioAccessTechnology, ServingCell, SignalReading};

/// Number of serving cell fields after `<cellid>` that are skipped before `<tac>`.
const SERVING_SKIPPED_FIELDS: usize = 5;

/// Errors that can occur during parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Not enough data in response")]
    NotEnoughData,

    #[error("Unsupported radio access technology: {0}")]
    UnsupportedTechnology(String),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Decode a QENG radio access technology string.
///
/// Matching is by prefix, so `"CAT-M1"` and `"eMTC"` both map to Cat M1.
/// Anything unrecognized (GSM, WCDMA, NR5G, ...) is `None`.
pub fn parse_rat(s: &str) -> RadioAccessTechnology {
    if s.starts_with("CAT-M") || s.starts_with("eMTC") {
        RadioAccessTechnology::LteCatM1
    } else if s.starts_with("LTE") {
        RadioAccessTechnology::Lte
    } else if s.starts_with("CAT-NB") {
        RadioAccessTechnology::LteNbIot
    } else {
        RadioAccessTechnology::None
    }
}

/// Parse a double-quoted string, returning its contents.
fn quoted(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_while1(|c: char| c != '"'), char('"')).parse(input)
}

/// Parse an unquoted field that is skipped (anything up to the next comma).
fn skipped(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c != ',').parse(input)
}

/// Parse an unsigned decimal number.
fn decimal<T: FromStr>(input: &str) -> IResult<&str, T> {
    map_res(digit1, |s: &str| s.parse::<T>()).parse(input)
}

/// Parse a signed decimal number such as `-95` or `+3`.
fn signed(input: &str) -> IResult<&str, i32> {
    map_res(
        recognize((opt(alt((char('-'), char('+')))), digit1)),
        |s: &str| s.parse::<i32>(),
    )
    .parse(input)
}

/// Parse a hexadecimal number without a prefix, either case.
fn hex_u32(input: &str) -> IResult<&str, u32> {
    map_res(hex_digit1, |s: &str| u32::from_str_radix(s, 16)).parse(input)
}

fn hex_u16(input: &str) -> IResult<&str, u16> {
    map_res(hex_digit1, |s: &str| u16::from_str_radix(s, 16)).parse(input)
}

/// Parse a signed decimal number that may carry a fractional part.
fn float(input: &str) -> IResult<&str, f32> {
    map_res(
        recognize((opt(char('-')), digit1, opt((char('.'), digit1)))),
        |s: &str| s.parse::<f32>(),
    )
    .parse(input)
}

/// Parse the `+QENG: ` prefix, tolerating surrounding whitespace.
fn qeng_prefix(input: &str) -> IResult<&str, ()> {
    let (input, _) = (space0, tag("+QENG:"), space0).parse(input)?;
    Ok((input, ()))
}

/// Fields extracted from a serving cell line before the RAT is decoded.
struct ServingFields<'a> {
    rat: &'a str,
    mcc: u16,
    mnc: u16,
    cell_id: u32,
    lac: u16,
    signal_power: i32,
}

fn serving_fields(input: &str) -> IResult<&str, ServingFields<'_>> {
    let (input, _) = qeng_prefix(input)?;
    let (input, _) = terminated(tag("\"servingcell\""), char(',')).parse(input)?;
    let (input, _state) = terminated(quoted, char(',')).parse(input)?;
    let (input, rat) = terminated(quoted, char(',')).parse(input)?;
    let (input, _duplex) = terminated(quoted, char(',')).parse(input)?;
    let (input, mcc) = terminated(decimal::<u16>, char(',')).parse(input)?;
    let (input, mnc) = terminated(decimal::<u16>, char(',')).parse(input)?;
    let (input, cell_id) = terminated(hex_u32, char(',')).parse(input)?;
    let (input, _) = count(terminated(skipped, char(',')), SERVING_SKIPPED_FIELDS).parse(input)?;
    let (input, lac) = terminated(hex_u16, char(',')).parse(input)?;
    let (input, signal_power) = signed(input)?;

    Ok((
        input,
        ServingFields {
            rat,
            mcc,
            mnc,
            cell_id,
            lac,
            signal_power,
        },
    ))
}

/// Fields extracted from a neighbor cell line before the RAT is decoded.
struct NeighborFields<'a> {
    rat: &'a str,
    earfcn: u32,
    neighbor_id: u16,
    signal_quality: i32,
    signal_power: i32,
    signal_strength: i32,
}

fn neighbor_fields(input: &str) -> IResult<&str, NeighborFields<'_>> {
    let (input, _) = qeng_prefix(input)?;
    // "neighbourcell intra", "neighbourcell inter", ...
    let (input, _) = terminated(
        delimited(
            tag("\"neighbourcell "),
            take_while1(|c: char| c != '"'),
            char('"'),
        ),
        char(','),
    )
    .parse(input)?;
    let (input, rat) = terminated(quoted, char(',')).parse(input)?;
    let (input, earfcn) = terminated(decimal::<u32>, char(',')).parse(input)?;
    let (input, neighbor_id) = terminated(decimal::<u16>, char(',')).parse(input)?;
    let (input, signal_quality) = terminated(signed, char(',')).parse(input)?;
    let (input, signal_power) = terminated(signed, char(',')).parse(input)?;
    let (input, signal_strength) = signed(input)?;

    Ok((
        input,
        NeighborFields {
            rat,
            earfcn,
            neighbor_id,
            signal_quality,
            signal_power,
            signal_strength,
        },
    ))
}

fn decode_rat(s: &str) -> ParseResult<RadioAccessTechnology> {
    match parse_rat(s) {
        RadioAccessTechnology::None => Err(ParseError::UnsupportedTechnology(s.to_string())),
        rat => Ok(rat),
    }
}

/// Parse a serving cell response line.
///
/// Trailing fields after the signal power are ignored.
///
/// # Example
///
/// ```
/// use quectel_tower::parser::parse_serving;
/// use quectel_tower::tower::RadioAccessTechnology;
///
/// let line = r#"+QENG: "servingcell","NOCONN","LTE","FDD",262,02,1A2B3C,5,5,1,1,1,64,-95"#;
/// let serving = parse_serving(line).unwrap();
/// assert_eq!(serving.rat, RadioAccessTechnology::Lte);
/// assert_eq!(serving.cell_id, 0x1A2B3C);
/// ```
pub fn parse_serving(input: &str) -> ParseResult<ServingCell> {
    let (_, fields) = serving_fields(input).map_err(|_| ParseError::NotEnoughData)?;
    let rat = decode_rat(fields.rat)?;

    Ok(ServingCell {
        rat,
        mcc: fields.mcc,
        mnc: fields.mnc,
        cell_id: fields.cell_id,
        lac: fields.lac,
        signal_power: fields.signal_power,
    })
}

/// Parse one neighbor cell response line.
///
/// # Example
///
/// ```
/// use quectel_tower::parser::parse_neighbor;
///
/// let line = r#"+QENG: "neighbourcell intra","LTE",6300,128,-11,-101,-72,0,20,7,-,-,-,-"#;
/// let neighbor = parse_neighbor(line).unwrap();
/// assert_eq!(neighbor.earfcn, 6300);
/// assert_eq!(neighbor.neighbor_id, 128);
/// ```
pub fn parse_neighbor(input: &str) -> ParseResult<NeighborCell> {
    let (_, fields) = neighbor_fields(input).map_err(|_| ParseError::NotEnoughData)?;
    let rat = decode_rat(fields.rat)?;

    Ok(NeighborCell {
        rat,
        earfcn: fields.earfcn,
        neighbor_id: fields.neighbor_id,
        signal_quality: fields.signal_quality,
        signal_power: fields.signal_power,
        signal_strength: fields.signal_strength,
    })
}

/// Parse an `AT+QCSQ` response line into a signal reading.
///
/// ```text
/// +QCSQ: "LTE",<rssi>,<rsrp>,<sinr>,<rsrq>
/// +QCSQ: "eMTC",-65,-94,162,-11
/// ```
///
/// RSRP is reported as the strength and RSRQ as the quality.
/// `+QCSQ: "NOSERVICE"` has no measurements and fails with `NotEnoughData`.
pub fn parse_signal_quality(input: &str) -> ParseResult<SignalReading> {
    let (_, reading) = signal_quality_fields(input).map_err(|_| ParseError::NotEnoughData)?;
    Ok(reading)
}

fn signal_quality_fields(input: &str) -> IResult<&str, SignalReading> {
    let (input, _) = (space0, tag("+QCSQ:"), space0).parse(input)?;
    let (input, _sysmode) = terminated(quoted, char(',')).parse(input)?;
    let (input, _rssi) = terminated(signed, char(',')).parse(input)?;
    let (input, strength) = terminated(float, char(',')).parse(input)?;
    let (input, _sinr) = terminated(signed, char(',')).parse(input)?;
    let (input, quality) = float(input)?;

    Ok((input, SignalReading { strength, quality }))
}

/// EPS network registration status from `AT+CEREG?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub mode: u8,
    pub stat: u8,
}

impl Registration {
    /// Registered on the home network (1) or roaming (5).
    pub fn is_registered(&self) -> bool {
        matches!(self.stat, 1 | 5)
    }
}

/// Parse an `AT+CEREG?` response line such as `+CEREG: 0,1`.
///
/// Optional trailing fields (`tac`, `ci`, `AcT`) are ignored.
pub fn parse_registration(input: &str) -> ParseResult<Registration> {
    let (_, registration) = registration_fields(input).map_err(|_| ParseError::NotEnoughData)?;
    Ok(registration)
}

fn registration_fields(input: &str) -> IResult<&str, Registration> {
    let (input, mode) = preceded((space0, tag("+CEREG:"), space0), decimal::<u8>).parse(input)?;
    let (input, stat) = preceded(char(','), decimal::<u8>).parse(input)?;

    Ok((input, Registration { mode, stat }))
}

/// Check if a line looks like a QENG response (quick pre-filter).
#[inline]
pub fn looks_like_qeng(line: &str) -> bool {
    line.trim_start().starts_with("+QENG:")
}
