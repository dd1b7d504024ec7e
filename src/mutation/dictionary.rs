//! Dictionary stage: insert/overwrite at random offsets with tokens drawn
//! from per-protocol dictionaries.

use rand::Rng;

use super::protocol::Protocol;

fn http_tokens() -> &'static [&'static [u8]] {
    &[
        b"GET", b"POST", b"PUT", b"DELETE", b"HEAD", b"OPTIONS", b"PATCH", b"TRACE", b"CONNECT",
        b"HTTP/1.0", b"HTTP/1.1", b"HTTP/2.0", b"Host:", b"Content-Length:", b"Content-Type:",
        b"Transfer-Encoding:", b"Connection:", b"\r\n", b"chunked",
    ]
}

fn dns_tokens() -> &'static [&'static [u8]] {
    &[
        &[0x00, 0x01], // A
        &[0x00, 0x02], // NS
        &[0x00, 0x05], // CNAME
        &[0x00, 0x0f], // MX
        &[0x00, 0x10], // TXT
        &[0x00, 0x1c], // AAAA
        &[0x00, 0xff], // ANY
        &[0xc0, 0x0c], // compression pointer to offset 12
        &[0xc0],       // bare compression pointer prefix
    ]
}

fn smtp_tokens() -> &'static [&'static [u8]] {
    &[
        b"HELO", b"EHLO", b"MAIL FROM:", b"RCPT TO:", b"DATA", b"RSET", b"NOOP", b"QUIT",
        b"VRFY", b"\r\n", b"\r\n.\r\n",
    ]
}

fn generic_tokens() -> &'static [&'static [u8]] {
    &[
        b"' OR '1'='1",
        b"'; DROP TABLE users;--",
        b"../../../../etc/passwd",
        b"$(reboot)",
        b"`id`",
        b"%n%n%n%n",
        b"%s%s%s%s",
        b"<script>alert(1)</script>",
        b"\x00\x00\x00\x00",
    ]
}

fn tokens_for(protocol: Option<Protocol>) -> &'static [&'static [u8]] {
    match protocol {
        Some(Protocol::Http) => http_tokens(),
        Some(Protocol::Dns) => dns_tokens(),
        Some(Protocol::Smtp) => smtp_tokens(),
        Some(Protocol::Generic) | Some(Protocol::Custom) | None => generic_tokens(),
    }
}

/// Insert or overwrite at a random offset with a token from the protocol's
/// dictionary (or the generic injection-payload dictionary with no
/// protocol configured).
pub fn dictionary_mutate<R: Rng>(input: &[u8], protocol: Option<Protocol>, rng: &mut R) -> Vec<u8> {
    let tokens = tokens_for(protocol);
    let token = tokens[rng.gen_range(0..tokens.len())];

    let mut out = input.to_vec();
    let insert = rng.gen_bool(0.5) || out.is_empty();
    if insert {
        let at = rng.gen_range(0..=out.len());
        out.splice(at..at, token.iter().copied());
    } else {
        let at = rng.gen_range(0..out.len());
        let end = (at + token.len()).min(out.len());
        out[at..end].copy_from_slice(&token[..end - at]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::thread_rng;

    #[test]
    fn dictionary_mutate_never_panics_across_protocols() {
        let mut rng = thread_rng();
        for protocol in [
            None,
            Some(Protocol::Http),
            Some(Protocol::Dns),
            Some(Protocol::Smtp),
            Some(Protocol::Generic),
            Some(Protocol::Custom),
        ] {
            for input in [&b""[..], &b"x"[..], &b"GET / HTTP/1.1\r\n\r\n"[..]] {
                let _ = dictionary_mutate(input, protocol, &mut rng);
            }
        }
    }
}
