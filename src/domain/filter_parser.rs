//! Filter DSL parser.
//!
//! Recursive descent parser for the filter grammar. Converts text to the
//! [`FilterExpr`] AST with error messages carrying the byte offset and the
//! expected/found tokens.

use crate::domain::error::ParseError;
use crate::domain::filter::{
    Comparator, Criterion, FilterExpr, IndicatorField, IndicatorRef, Operand, bollinger_width_x100,
};
use crate::domain::indicator::IndicatorType;
use crate::domain::signal::{Direction, Zone};

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.pos,
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(self.error(format!("expected '{}', found '{}'", expected, ch))),
            None => Err(self.error(format!("expected '{}', found end of input", expected))),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        let remaining = self.remaining();
        remaining.starts_with(keyword)
            && !remaining[keyword.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn peek_word(&self) -> String {
        let word: String = self
            .remaining()
            .chars()
            .take_while(|ch| ch.is_alphanumeric() || *ch == '_')
            .collect();
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word
        }
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        if self.peek() == Some('-') {
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(ParseError {
                message: format!("expected number, found '{}'", self.peek_word()),
                position: start,
            });
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {}", num_str),
            position: start,
        })
    }

    fn parse_integer(&mut self) -> Result<usize, ParseError> {
        self.skip_whitespace();
        let start = self.pos;

        while self.peek().is_some_and(|ch| ch.is_ascii_digit()) {
            self.advance();
        }

        if self.pos == start {
            return Err(self.error(format!("expected integer, found '{}'", self.peek_word())));
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<usize>().map_err(|_| ParseError {
            message: format!("invalid integer: {}", num_str),
            position: start,
        })
    }

    /// `n, n, ...)` after an opening parenthesis already consumed.
    fn parse_int_args<const N: usize>(&mut self) -> Result<[usize; N], ParseError> {
        let mut args = [0; N];
        for (i, slot) in args.iter_mut().enumerate() {
            if i > 0 {
                self.expect_char(',')?;
            }
            *slot = self.parse_integer()?;
        }
        self.expect_char(')')?;
        Ok(args)
    }

    fn parse_indicator(&mut self) -> Result<Operand, ParseError> {
        self.skip_whitespace();
        let word = self.peek_word();
        let start = self.pos;

        if matches!(word.as_str(), "SMA" | "MA" | "EMA" | "RSI" | "VOLUME_SMA") {
            self.pos += word.len();
            self.expect_char('(')?;
            let [period] = self.parse_int_args::<1>()?;
            let indicator_type = match word.as_str() {
                "EMA" => IndicatorType::Ema(period),
                "RSI" => IndicatorType::Rsi(period),
                "VOLUME_SMA" => IndicatorType::VolumeSma(period),
                _ => IndicatorType::Sma(period),
            };
            return Ok(Operand::indicator(indicator_type, IndicatorField::Value));
        }

        let field = match word.as_str() {
            "MACD_LINE" => Some(IndicatorField::MacdLine),
            "MACD_SIGNAL" => Some(IndicatorField::MacdSignal),
            "MACD_HISTOGRAM" => Some(IndicatorField::MacdHistogram),
            "KDJ_K" => Some(IndicatorField::KdjK),
            "KDJ_D" => Some(IndicatorField::KdjD),
            "KDJ_J" => Some(IndicatorField::KdjJ),
            "BOLLINGER_UPPER" => Some(IndicatorField::BollingerUpper),
            "BOLLINGER_MIDDLE" => Some(IndicatorField::BollingerMiddle),
            "BOLLINGER_LOWER" => Some(IndicatorField::BollingerLower),
            "BOLLINGER_WIDTH" => Some(IndicatorField::BollingerWidth),
            _ => None,
        };

        let Some(field) = field else {
            return Err(ParseError {
                message: format!("expected indicator, found '{}'", word),
                position: start,
            });
        };

        self.pos += word.len();
        self.expect_char('(')?;
        let indicator_type = match field {
            IndicatorField::MacdLine | IndicatorField::MacdSignal | IndicatorField::MacdHistogram => {
                let [fast, slow, signal] = self.parse_int_args::<3>()?;
                IndicatorType::Macd { fast, slow, signal }
            }
            IndicatorField::KdjK | IndicatorField::KdjD | IndicatorField::KdjJ => {
                let [period, k_smooth, d_smooth] = self.parse_int_args::<3>()?;
                IndicatorType::Kdj {
                    period,
                    k_smooth,
                    d_smooth,
                }
            }
            _ => {
                let period = self.parse_integer()?;
                self.expect_char(',')?;
                self.skip_whitespace();
                let width_at = self.pos;
                let width = self.parse_number()?;
                let width_x100 = bollinger_width_x100(width).map_err(|message| ParseError {
                    message,
                    position: width_at,
                })?;
                self.expect_char(')')?;
                IndicatorType::Bollinger { period, width_x100 }
            }
        };

        Ok(Operand::Indicator(IndicatorRef {
            indicator_type,
            field,
        }))
    }

    fn parse_operand(&mut self) -> Result<Operand, ParseError> {
        self.skip_whitespace();

        if self
            .peek()
            .is_some_and(|ch| ch.is_ascii_digit() || ch == '-' || ch == '.')
        {
            let num = self.parse_number()?;
            return Ok(Operand::Constant(num));
        }

        let word = self.peek_word();
        let price = match word.as_str() {
            "open" => Some(Operand::Open),
            "high" => Some(Operand::High),
            "low" => Some(Operand::Low),
            "close" => Some(Operand::Close),
            "volume" => Some(Operand::Volume),
            _ => None,
        };
        match price {
            Some(operand) => {
                self.pos += word.len();
                Ok(operand)
            }
            None => self.parse_indicator(),
        }
    }

    fn parse_zone(&mut self) -> Result<Zone, ParseError> {
        self.skip_whitespace();
        for (keyword, zone) in [
            ("OVERBOUGHT", Zone::Overbought),
            ("OVERSOLD", Zone::Oversold),
            ("NEUTRAL", Zone::Neutral),
        ] {
            if self.consume_keyword(keyword) {
                return Ok(zone);
            }
        }
        Err(self.error(format!(
            "expected zone (OVERBOUGHT, OVERSOLD, NEUTRAL), found '{}'",
            self.peek_word()
        )))
    }

    fn parse_comparison(&mut self, comparator: Comparator) -> Result<Criterion, ParseError> {
        self.expect_char('(')?;
        let left = self.parse_operand()?;
        self.expect_char(',')?;
        let right = self.parse_operand()?;
        self.expect_char(')')?;
        Ok(Criterion::Compare {
            left,
            comparator,
            right,
        })
    }

    fn parse_cross(&mut self, direction: Direction) -> Result<Criterion, ParseError> {
        self.expect_char('(')?;
        let left = self.parse_operand()?;
        self.expect_char(',')?;
        let right = self.parse_operand()?;
        self.expect_char(')')?;
        Ok(Criterion::Cross {
            left,
            right,
            direction,
        })
    }

    fn parse_between(&mut self) -> Result<Criterion, ParseError> {
        self.expect_char('(')?;
        let operand = self.parse_operand()?;
        self.expect_char(',')?;
        let low = self.parse_number()?;
        self.expect_char(',')?;
        let high = self.parse_number()?;
        self.expect_char(')')?;
        Ok(Criterion::Range {
            operand,
            low: Some(low),
            high: Some(high),
        })
    }

    fn parse_zone_criterion(&mut self, entered: bool) -> Result<Criterion, ParseError> {
        self.expect_char('(')?;
        let operand = self.parse_operand()?;
        self.expect_char(',')?;
        let low = self.parse_number()?;
        self.expect_char(',')?;
        let high = self.parse_number()?;
        self.expect_char(',')?;
        let zone = self.parse_zone()?;
        self.expect_char(')')?;
        Ok(Criterion::Zone {
            operand,
            low,
            high,
            zone,
            entered,
        })
    }

    fn parse_volume_change(&mut self, direction: Direction) -> Result<Criterion, ParseError> {
        self.expect_char('(')?;
        let lag = self.parse_integer()?;
        self.expect_char(',')?;
        let factor = self.parse_number()?;
        self.expect_char(')')?;
        Ok(Criterion::VolumeChange {
            lag,
            factor,
            direction,
        })
    }

    fn parse_squeeze(&mut self) -> Result<Criterion, ParseError> {
        self.expect_char('(')?;
        let period = self.parse_integer()?;
        self.expect_char(',')?;
        let width = self.parse_number()?;
        self.expect_char(',')?;
        let ratio = self.parse_number()?;
        self.expect_char(')')?;
        Ok(Criterion::Squeeze {
            period,
            width,
            ratio,
        })
    }

    fn parse_criterion(&mut self) -> Result<Option<Criterion>, ParseError> {
        let criterion = if self.consume_keyword("ABOVE") {
            self.parse_comparison(Comparator::Gt)?
        } else if self.consume_keyword("BELOW") {
            self.parse_comparison(Comparator::Lt)?
        } else if self.consume_keyword("AT_LEAST") {
            self.parse_comparison(Comparator::Ge)?
        } else if self.consume_keyword("AT_MOST") {
            self.parse_comparison(Comparator::Le)?
        } else if self.consume_keyword("BETWEEN") {
            self.parse_between()?
        } else if self.consume_keyword("CROSS_ABOVE") {
            self.parse_cross(Direction::Up)?
        } else if self.consume_keyword("CROSS_BELOW") {
            self.parse_cross(Direction::Down)?
        } else if self.consume_keyword("IN_ZONE") {
            self.parse_zone_criterion(false)?
        } else if self.consume_keyword("ENTERS_ZONE") {
            self.parse_zone_criterion(true)?
        } else if self.consume_keyword("VOLUME_UP") {
            self.parse_volume_change(Direction::Up)?
        } else if self.consume_keyword("VOLUME_DOWN") {
            self.parse_volume_change(Direction::Down)?
        } else if self.consume_keyword("SQUEEZE") {
            self.parse_squeeze()?
        } else {
            return Ok(None);
        };
        Ok(Some(criterion))
    }

    fn parse_filter(&mut self) -> Result<FilterExpr, ParseError> {
        self.skip_whitespace();

        if let Some(criterion) = self.parse_criterion()? {
            return Ok(FilterExpr::leaf(criterion));
        }

        if self.consume_keyword("AND") {
            return Ok(FilterExpr::And(self.parse_list()?));
        }
        if self.consume_keyword("OR") {
            return Ok(FilterExpr::Or(self.parse_list()?));
        }
        if self.consume_keyword("NOT") {
            self.expect_char('(')?;
            let inner = self.parse_filter()?;
            self.expect_char(')')?;
            return Ok(FilterExpr::Not(Box::new(inner)));
        }
        if self.consume_keyword("CONSECUTIVE") {
            let (expr, bars) = self.parse_windowed()?;
            return Ok(FilterExpr::Consecutive { expr, bars });
        }
        if self.consume_keyword("ANY_OF") {
            let (expr, bars) = self.parse_windowed()?;
            return Ok(FilterExpr::AnyOf { expr, bars });
        }

        Err(self.error(format!("expected filter, found '{}'", self.peek_word())))
    }

    fn parse_list(&mut self) -> Result<Vec<FilterExpr>, ParseError> {
        self.expect_char('(')?;
        let mut children = vec![self.parse_filter()?];
        loop {
            self.skip_whitespace();
            if self.peek() == Some(')') {
                self.advance();
                return Ok(children);
            }
            self.expect_char(',')?;
            children.push(self.parse_filter()?);
        }
    }

    fn parse_windowed(&mut self) -> Result<(Box<FilterExpr>, usize), ParseError> {
        self.expect_char('(')?;
        let expr = self.parse_filter()?;
        self.expect_char(',')?;
        let bars = self.parse_integer()?;
        self.expect_char(')')?;
        Ok((Box::new(expr), bars))
    }

    fn expect_end(&mut self, what: &str) -> Result<(), ParseError> {
        self.skip_whitespace();
        if self.pos < self.input.len() {
            return Err(self.error(format!(
                "unexpected input after {}: '{}'",
                what,
                self.remaining()
            )));
        }
        Ok(())
    }
}

/// Parse a complete filter expression.
pub fn parse(input: &str) -> Result<FilterExpr, ParseError> {
    let mut parser = Parser::new(input);
    let expr = parser.parse_filter()?;
    parser.expect_end("filter")?;
    Ok(expr)
}

/// Parse a single operand such as `close`, `70` or `MACD_LINE(12,26,9)`.
pub fn parse_operand(input: &str) -> Result<Operand, ParseError> {
    let mut parser = Parser::new(input);
    let operand = parser.parse_operand()?;
    parser.expect_end("operand")?;
    Ok(operand)
}
