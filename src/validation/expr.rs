//! SQL expression syntax checks using sqlparser-rs.
//!
//! Expressions are parsed with `GenericDialect`, since the engine that
//! eventually evaluates them is not known here. Only syntax is checked;
//! column references are not resolved.

use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

/// Check that `raw` parses as a single SQL expression with nothing after it.
///
/// Returns the parser's message on failure.
///
/// ```
/// use joindecl::validation::expr::check_expression;
///
/// assert!(check_expression("UNIX_TIMESTAMP(ts) * 1000").is_ok());
/// assert!(check_expression("sum(").is_err());
/// ```
pub fn check_expression(raw: &str) -> Result<(), String> {
    if raw.trim().is_empty() {
        return Err("expression is empty".to_string());
    }

    let dialect = GenericDialect {};
    let mut parser = Parser::new(&dialect)
        .try_with_sql(raw)
        .map_err(|e| e.to_string())?;
    parser.parse_expr().map_err(|e| e.to_string())?;

    match parser.peek_token().token {
        Token::EOF => Ok(()),
        trailing => Err(format!("unexpected '{}' after expression", trailing)),
    }
}
