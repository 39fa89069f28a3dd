//! `.netrc` credential lookup for origin requests.
//!
//! A missing file or missing machine entry means "no credentials", never an
//! error; the origin decides whether anonymous access is acceptable.

use std::path::Path;

use crate::util;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

/// Look up credentials for `url`'s host in the invoking user's `~/.netrc`.
pub fn lookup_credentials(url: &str) -> Option<Credentials> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let netrc_path = util::original_user_home().ok()?.join(".netrc");
    lookup_in_file(&netrc_path, host)
}

fn lookup_in_file(path: &Path, host: &str) -> Option<Credentials> {
    let content = std::fs::read_to_string(path).ok()?;
    parse_netrc(&content, host)
}

/// Token-stream parse: `machine <host> login <user> password <pass>`, in any
/// line layout, with `default` as a catch-all entry.
fn parse_netrc(content: &str, host: &str) -> Option<Credentials> {
    let mut tokens = content.split_whitespace();
    let mut matched = false;
    let mut in_default = false;
    let mut login = None;
    let mut password = None;
    let mut fallback: Option<Credentials> = None;

    while let Some(tok) = tokens.next() {
        match tok {
            "machine" => {
                if matched {
                    break; // entry for our host is complete
                }
                if in_default {
                    fallback = finish_entry(&mut login, &mut password);
                    in_default = false;
                }
                matched = tokens.next() == Some(host);
                login = None;
                password = None;
            }
            "default" => {
                if matched {
                    break;
                }
                in_default = true;
                login = None;
                password = None;
            }
            "login" => {
                login = tokens.next().map(str::to_string);
            }
            "password" => {
                password = tokens.next().map(str::to_string);
            }
            // macdef bodies and unknown tokens are skipped one at a time;
            // good enough for the machine/login/password files we target.
            _ => {}
        }
    }

    if matched {
        finish_entry(&mut login, &mut password)
    } else if in_default {
        finish_entry(&mut login, &mut password)
    } else {
        fallback
    }
}

fn finish_entry(login: &mut Option<String>, password: &mut Option<String>) -> Option<Credentials> {
    match (login.take(), password.take()) {
        (Some(login), Some(password)) => Some(Credentials { login, password }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_machine_entry() {
        let content = "machine example.com login alice password s3cret\n";
        let creds = parse_netrc(content, "example.com").unwrap();
        assert_eq!(creds.login, "alice");
        assert_eq!(creds.password, "s3cret");
    }

    #[test]
    fn multiline_entries() {
        let content = "machine one.test\n  login a\n  password b\nmachine two.test\n  login c\n  password d\n";
        let creds = parse_netrc(content, "two.test").unwrap();
        assert_eq!(creds.login, "c");
        assert_eq!(creds.password, "d");
    }

    #[test]
    fn unknown_host_is_none() {
        let content = "machine example.com login alice password s3cret\n";
        assert!(parse_netrc(content, "other.com").is_none());
    }

    #[test]
    fn default_entry_is_fallback() {
        let content = "machine example.com login a password b\ndefault login anon password guest\n";
        let creds = parse_netrc(content, "other.com").unwrap();
        assert_eq!(creds.login, "anon");
        let specific = parse_netrc(content, "example.com").unwrap();
        assert_eq!(specific.login, "a");
    }

    #[test]
    fn incomplete_entry_is_none() {
        let content = "machine example.com login alice\n";
        assert!(parse_netrc(content, "example.com").is_none());
    }
}
