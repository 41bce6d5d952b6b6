//! Escaping of outbound data blocks.
//!
//! A data block ends at the first `CR LF . CR LF`. Text that contains that
//! sequence must have the dot doubled so the daemon does not stop reading
//! early. The rules are plain textual substitutions: runs of dots such as
//! `"\r\n.\r\n.\r\n"` are only partly escaped because matches do not
//! overlap. That is a known limitation of the protocol and is kept as is.

use crate::protocol::END_OF_DATA;

/// A terminator look-alike at the very start of a block.
const END_OF_DATA_BEGIN: &str = ".\r\n";
const END_OF_DATA_ESCAPED_BEGIN: &str = "..\r\n";
const END_OF_DATA_SINGLE: &str = ".";
const END_OF_DATA_ESCAPED_SINGLE: &str = "..";
const END_OF_DATA_ESCAPED: &str = "\r\n..\r\n";

/// Escape `data` so it can be followed by [`END_OF_DATA`].
pub fn escape_data(data: &str) -> String {
    let data = if let Some(rest) = data.strip_prefix(END_OF_DATA_BEGIN) {
        format!("{}{}", END_OF_DATA_ESCAPED_BEGIN, rest)
    } else if data == END_OF_DATA_SINGLE {
        END_OF_DATA_ESCAPED_SINGLE.to_string()
    } else {
        data.to_string()
    };

    data.replace(END_OF_DATA, END_OF_DATA_ESCAPED)
}

/// The bytes actually written for a data block: escaped text plus terminator.
pub fn encode_data_block(data: &str) -> String {
    let mut block = escape_data(data);
    block.push_str(END_OF_DATA);
    block
}
