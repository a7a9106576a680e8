//! One handler file per POP3 command, plus the shared multi-line
//! reply encoder.

mod dele;
mod list;
mod pass;
mod quit;
mod retr;
mod stat;
mod top;
mod uidl;

pub use apop::handle_apop;
pub use dele::handle_dele;
pub use list::handle_list;
pub use pass::handle_pass;
pub use quit::handle_quit;
pub use retr::handle_retr;
pub use stat::handle_stat;
pub use top::handle_top;
pub use uidl::handle_uidl;
pub use user::handle_user;

/// Encode a message body as a POP3 multi-line payload: CRLF line
/// endings, dot-stuffing for lines starting with `.`, and the
/// terminating `.CRLF`.
pub fn dot_stuffed(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + 16);
    for line in raw.split_inclusive(|&b| b == b'\n') {
        let body = line.strip_suffix(b"\n").unwrap_or(line);
        let body = body.strip_suffix(b"\r").unwrap_or(body);
        if body.first() == Some(&b'.') {
            out.push(b'.');
        }
        out.extend_from_slice(body);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::dot_stuffed;

    #[test]
    fn stuffs_leading_dots_and_terminates() {
        let wire = dot_stuffed(b"a\n.b\n");
        assert_eq!(wire, b"a\r\n..b\r\n.\r\n");
    }

    #[test]
    fn repairs_missing_final_newline() {
        let wire = dot_stuffed(b"tail");
        assert_eq!(wire, b"tail\r\n.\r\n");
    }
}
