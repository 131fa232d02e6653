//! Authors file: maps TFVC identities to Git names and emails.
//!
//! One mapping per line, `TFVC_NAME = Display Name <email>`. Blank lines
//! are skipped. TFVC names compare case-insensitively, as Windows account
//! names do.

use crate::FHashMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

#[derive(Clone)]
pub struct AuthorsMap {
    map: FHashMap<String, Author>,
}

#[derive(Debug)]
pub enum AuthorsParseError {
    Io(std::io::Error),
    BadLine(usize, String),
}

impl From<std::io::Error> for AuthorsParseError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

impl std::fmt::Display for AuthorsParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Io(ref e) => e.fmt(f),
            Self::BadLine(line, ref line_data) => {
                write!(f, "bad line {}: {line_data:?}", line + 1)
            }
        }
    }
}

impl AuthorsMap {
    pub fn new() -> Self {
        Self {
            map: FHashMap::default(),
        }
    }

    pub fn parse(src: &mut dyn std::io::BufRead) -> Result<Self, AuthorsParseError> {
        let mut map = FHashMap::default();

        let mut line_i = 0;
        let mut line = String::new();
        loop {
            line.clear();
            if src.read_line(&mut line)? == 0 {
                break;
            }
            match parse_line(&line) {
                Some(Some((tfvc_name, author))) => {
                    map.insert(tfvc_name.to_ascii_lowercase(), author);
                }
                Some(None) => {}
                None => return Err(AuthorsParseError::BadLine(line_i, line)),
            }
            line_i += 1;
        }

        Ok(Self { map })
    }

    pub fn get(&self, tfvc_name: &str) -> Option<&Author> {
        self.map.get(&tfvc_name.to_ascii_lowercase())
    }
}

impl Default for AuthorsMap {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_line(line: &str) -> Option<Option<(String, Author)>> {
    let line = line.trim();
    if line.is_empty() {
        return Some(None);
    }

    let (tfvc_name, rest) = line.split_once('=')?;
    let tfvc_name = tfvc_name.trim();
    if tfvc_name.is_empty() {
        return None;
    }

    let (display_name, rest) = rest.split_once('<')?;
    let (email, rest) = rest.split_once('>')?;
    if !rest.trim().is_empty() {
        return None;
    }

    Some(Some((
        tfvc_name.to_owned(),
        Author {
            name: display_name.trim().to_owned(),
            email: email.trim().to_owned(),
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::{parse_line, Author, AuthorsMap};

    #[test]
    fn parses_lines() {
        assert_eq!(
            parse_line("DOMAIN\\alice = Alice Liddell <alice@example.com>"),
            Some(Some((
                "DOMAIN\\alice".to_owned(),
                Author {
                    name: "Alice Liddell".to_owned(),
                    email: "alice@example.com".to_owned(),
                },
            ))),
        );
        assert_eq!(
            parse_line("bob=Bob<bob@example.com>"),
            Some(Some((
                "bob".to_owned(),
                Author {
                    name: "Bob".to_owned(),
                    email: "bob@example.com".to_owned(),
                },
            ))),
        );
        assert_eq!(parse_line("   "), Some(None));
        assert_eq!(parse_line("no equals sign"), None);
        assert_eq!(parse_line("user = no email"), None);
        assert_eq!(parse_line("user = Name <mail> trailing"), None);
    }

    #[test]
    fn lookup_ignores_case() {
        let input = "DOMAIN\\Alice = Alice <alice@example.com>\n\nbob = Bob <bob@example.com>\n";
        let authors = AuthorsMap::parse(&mut input.as_bytes()).unwrap();

        assert_eq!(
            authors.get("domain\\alice").map(|a| a.email.as_str()),
            Some("alice@example.com"),
        );
        assert_eq!(authors.get("BOB").map(|a| a.name.as_str()), Some("Bob"));
        assert!(authors.get("carol").is_none());
    }
}
