/*!
Utitilies for reading and writing the autosql section of a bigBed.
*/

use thiserror::Error;

const BED_FIELDS: &[(&str, &str, &str)] = &[
    ("string", "chrom", "Reference sequence chromosome or scaffold"),
    ("uint", "chromStart", "Start position in chromosome"),
    ("uint", "chromEnd", "End position in chromosome"),
    ("string", "name", "Name of item."),
    ("uint", "score", "Score (0-1000)"),
    ("char[1]", "strand", "+ or - for strand"),
    ("uint", "thickStart", "Start of where display should be thick (start codon)"),
    ("uint", "thickEnd", "End of where display should be thick (stop codon)"),
    ("uint", "reserved", "Used as itemRgb as of 2004-11-22"),
    ("int", "blockCount", "Number of blocks"),
    ("int[blockCount]", "blockSizes", "Comma separated list of block sizes"),
    ("int[blockCount]", "chromStarts", "Start positions relative to chromStart"),
    ("int", "expCount", "Experiment count"),
    ("int[expCount]", "expIds", "Comma separated list of experiment ids. Always 0,1,2,3...."),
    ("float[expCount]", "expScores", "Comma separated list of experiment scores."),
];

/// The default schema for a bed file with `bed_n` standard columns
/// (`3..=15`) and `total_fields` columns overall.
///
/// Columns past the standard ones are named `fieldN`.
pub fn bed_autosql(bed_n: u16, total_fields: usize) -> String {
    let bed_n = usize::from(bed_n).clamp(3, BED_FIELDS.len());
    let mut def = "table bed\n\"Browser Extensible Data\"\n(\n".to_string();
    for (kind, name, description) in &BED_FIELDS[..bed_n] {
        def.push_str(&format!("    {} {}; \"{}\"\n", kind, name, description));
    }
    for i in bed_n..total_fields {
        def.push_str(&format!(
            "    lstring field{}; \"Undocumented field\"\n",
            i + 1
        ));
    }
    def.push(')');
    def
}

/// A single column of an autosql table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    /// The declared type, including any array size, like `int[blockCount]`
    pub kind: String,
    pub name: String,
    pub description: Option<String>,
}

/// A parsed autosql table declaration
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AutoSql {
    pub name: Option<String>,
    pub description: Option<String>,
    pub columns: Vec<Column>,
}

impl AutoSql {
    pub fn column_name(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(|c| c.name.as_str())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AutoSqlError {
    #[error("Unexpected end of autosql.")]
    UnexpectedEnd,
    #[error("Unexpected character {:?} at byte {}.", .0, .1)]
    UnexpectedCharacter(char, usize),
    #[error("Unterminated string starting at byte {}.", .0)]
    UnterminatedString(usize),
    #[error("Expected {} at byte {}.", .0, .1)]
    Expected(&'static str, usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    LParen,
    RParen,
    Semicolon,
    Comma,
    ArraySize(String),
}

fn tokenize(text: &str) -> Result<Vec<(Token, usize)>, AutoSqlError> {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    let mut tokens = vec![];
    let mut chars = text.char_indices().peekable();
    while let Some((pos, c)) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            '(' => Token::LParen,
            ')' => Token::RParen,
            ';' => Token::Semicolon,
            ',' => Token::Comma,
            '[' => {
                let mut size = String::new();
                loop {
                    match chars.next() {
                        Some((_, ']')) => break,
                        Some((_, c)) if is_ident(c) => size.push(c),
                        Some((p, c)) => return Err(AutoSqlError::UnexpectedCharacter(c, p)),
                        None => return Err(AutoSqlError::UnexpectedEnd),
                    }
                }
                Token::ArraySize(size)
            }
            '"' | '\'' => {
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some((_, q)) if q == c => break,
                        Some((_, other)) => value.push(other),
                        None => return Err(AutoSqlError::UnterminatedString(pos)),
                    }
                }
                Token::Str(value)
            }
            c if is_ident(c) => {
                let mut ident = c.to_string();
                while let Some(&(_, next)) = chars.peek() {
                    if !is_ident(next) {
                        break;
                    }
                    ident.push(next);
                    chars.next();
                }
                Token::Ident(ident)
            }
            other => return Err(AutoSqlError::UnexpectedCharacter(other, pos)),
        };
        tokens.push((token, pos));
    }
    Ok(tokens)
}

struct Parser {
    tokens: std::iter::Peekable<std::vec::IntoIter<(Token, usize)>>,
    end: usize,
}

impl Parser {
    fn next(&mut self) -> Result<(Token, usize), AutoSqlError> {
        self.tokens.next().ok_or(AutoSqlError::UnexpectedEnd)
    }

    fn peek(&mut self) -> Option<&Token> {
        self.tokens.peek().map(|(t, _)| t)
    }

    fn ident(&mut self) -> Result<String, AutoSqlError> {
        match self.next()? {
            (Token::Ident(ident), _) => Ok(ident),
            (_, pos) => Err(AutoSqlError::Expected("an identifier", pos)),
        }
    }

    fn expect(&mut self, token: Token, what: &'static str) -> Result<(), AutoSqlError> {
        match self.next()? {
            (t, _) if t == token => Ok(()),
            (_, pos) => Err(AutoSqlError::Expected(what, pos)),
        }
    }

    fn optional_string(&mut self) -> Option<String> {
        if let Some(Token::Str(_)) = self.peek() {
            if let Some((Token::Str(s), _)) = self.tokens.next() {
                return Some(s);
            }
        }
        None
    }

    fn column_kind(&mut self) -> Result<String, AutoSqlError> {
        let mut kind = self.ident()?;
        match self.peek() {
            Some(Token::ArraySize(_)) => {
                if let (Token::ArraySize(size), _) = self.next()? {
                    kind.push_str(&format!("[{}]", size));
                }
            }
            // enum(a, b) and set(a, b)
            Some(Token::LParen) => {
                self.next()?;
                let mut values = vec![];
                loop {
                    match self.next()? {
                        (Token::RParen, _) => break,
                        (Token::Comma, _) => {}
                        (Token::Ident(v), _) | (Token::Str(v), _) => values.push(v),
                        (_, pos) => return Err(AutoSqlError::Expected("an enum value", pos)),
                    }
                }
                kind.push_str(&format!("({})", values.join(", ")));
            }
            _ => {}
        }
        Ok(kind)
    }

    fn table(&mut self) -> Result<AutoSql, AutoSqlError> {
        let mut autosql = AutoSql::default();
        if self.peek().is_none() {
            return Ok(autosql);
        }
        match self.next()? {
            (Token::Ident(kind), _) if matches!(kind.as_str(), "table" | "simple" | "object") => {}
            (_, pos) => return Err(AutoSqlError::Expected("table", pos)),
        }
        autosql.name = match self.next()? {
            (Token::Ident(name), _) | (Token::Str(name), _) => Some(name),
            (_, pos) => return Err(AutoSqlError::Expected("a table name", pos)),
        };
        autosql.description = self.optional_string();
        self.expect(Token::LParen, "(")?;
        loop {
            match self.peek() {
                Some(Token::RParen) => {
                    self.next()?;
                    break;
                }
                None => return Err(AutoSqlError::Expected(")", self.end)),
                _ => {}
            }
            let kind = self.column_kind()?;
            let name = self.ident()?;
            // Index annotations like `primary` or `index[12]` before the `;`
            while let Some(Token::Ident(_)) | Some(Token::ArraySize(_)) = self.peek() {
                self.next()?;
            }
            self.expect(Token::Semicolon, ";")?;
            let description = self.optional_string();
            autosql.columns.push(Column {
                kind,
                name,
                description,
            });
        }
        Ok(autosql)
    }
}

/// Parses a single autosql table declaration. Empty text gives an empty table.
pub fn parse_autosql(text: &str) -> Result<AutoSql, AutoSqlError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        tokens: tokens.into_iter().peekable(),
        end: text.len(),
    };
    parser.table()
}
