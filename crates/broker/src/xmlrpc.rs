//! XML-RPC encoding for broker calls.
//!
//! Values travel as [`serde_json::Value`] so results can be deserialized with
//! serde like any other payload.

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use serde_json::{Map, Number, Value};

use crate::error::{Error, Result};

/// Decoded `methodResponse`.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// The call returned a value; `Null` when it returned nothing.
    Success(Value),
    /// The server raised a fault.
    Fault { code: i64, message: String },
}

/// Render a `methodCall` document.
pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodCall>");
    tagged(&mut out, "methodName", &escape(method));
    out.push_str("<params>");
    for param in params {
        out.push_str("<param>");
        encode_value(param, &mut out);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>\n");
    out
}

fn encode_value(value: &Value, out: &mut String) {
    out.push_str("<value>");
    match value {
        Value::Null => out.push_str("<nil/>"),
        Value::Bool(flag) => tagged(out, "boolean", if *flag { "1" } else { "0" }),
        Value::Number(n) => encode_number(n, out),
        Value::String(s) => tagged(out, "string", &escape(s.as_str())),
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                encode_value(item, out);
            }
            out.push_str("</data></array>");
        }
        Value::Object(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member>");
                tagged(out, "name", &escape(name.as_str()));
                encode_value(member, out);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
    }
    out.push_str("</value>");
}

fn encode_number(n: &Number, out: &mut String) {
    match n.as_i64() {
        Some(i) if i32::try_from(i).is_ok() => tagged(out, "int", &i.to_string()),
        Some(i) => tagged(out, "i8", &i.to_string()),
        None => tagged(out, "double", &n.to_string()),
    }
}

fn tagged(out: &mut String, tag: &str, text: &str) {
    out.push('<');
    out.push_str(tag);
    out.push('>');
    out.push_str(text);
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

/// Parse a `methodResponse` document.
pub fn decode_response(body: &str) -> Result<Response> {
    let mut parser = Parser::new(body);
    parser.expect_open("methodResponse")?;

    let response = match parser.next_tag()? {
        Token::Open(tag) if tag == "params" => match parser.next_tag()? {
            Token::Open(tag) if tag == "param" => {
                let value = parser.value_element()?;
                parser.expect_close("param")?;
                parser.expect_close("params")?;
                Response::Success(value)
            }
            Token::Close(tag) if tag == "params" => Response::Success(Value::Null),
            other => return Err(unexpected(&other, "<param>")),
        },
        Token::Empty(tag) if tag == "params" => Response::Success(Value::Null),
        Token::Open(tag) if tag == "fault" => {
            let fault = parser.value_element()?;
            parser.expect_close("fault")?;
            Response::Fault {
                code: fault
                    .get("faultCode")
                    .and_then(Value::as_i64)
                    .unwrap_or_default(),
                message: fault
                    .get("faultString")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }
        }
        other => return Err(unexpected(&other, "<params> or <fault>")),
    };

    parser.expect_close("methodResponse")?;
    Ok(response)
}

#[derive(Debug)]
enum Token {
    Open(String),
    Close(String),
    Empty(String),
    Text(String),
    Eof,
}

struct Parser<'a> {
    reader: Reader<&'a [u8]>,
}

impl<'a> Parser<'a> {
    fn new(body: &'a str) -> Self {
        Self {
            reader: Reader::from_str(body),
        }
    }

    /// Next token, skipping declarations, comments and processing instructions.
    fn next(&mut self) -> Result<Token> {
        loop {
            let token = match self.reader.read_event().map_err(malformed)? {
                Event::Start(e) => Token::Open(tag_name(e.name().as_ref())),
                Event::End(e) => Token::Close(tag_name(e.name().as_ref())),
                Event::Empty(e) => Token::Empty(tag_name(e.name().as_ref())),
                Event::Text(e) => Token::Text(e.unescape().map_err(malformed)?.into_owned()),
                Event::CData(e) => Token::Text(String::from_utf8_lossy(&e).into_owned()),
                Event::Eof => Token::Eof,
                _ => continue,
            };
            return Ok(token);
        }
    }

    /// Next token that is not whitespace between elements.
    fn next_tag(&mut self) -> Result<Token> {
        loop {
            match self.next()? {
                Token::Text(text) if text.trim().is_empty() => {}
                token => return Ok(token),
            }
        }
    }

    fn expect_open(&mut self, tag: &str) -> Result<()> {
        match self.next_tag()? {
            Token::Open(found) if found == tag => Ok(()),
            other => Err(unexpected(&other, &format!("<{tag}>"))),
        }
    }

    fn expect_close(&mut self, tag: &str) -> Result<()> {
        match self.next_tag()? {
            Token::Close(found) if found == tag => Ok(()),
            other => Err(unexpected(&other, &format!("</{tag}>"))),
        }
    }

    /// Text content up to the closing `tag`.
    fn text(&mut self, tag: &str) -> Result<String> {
        let mut text = String::new();
        loop {
            match self.next()? {
                Token::Text(chunk) => text.push_str(&chunk),
                Token::Close(found) if found == tag => return Ok(text),
                other => return Err(unexpected(&other, &format!("</{tag}>"))),
            }
        }
    }

    /// A complete `<value>` element.
    fn value_element(&mut self) -> Result<Value> {
        match self.next_tag()? {
            Token::Open(tag) if tag == "value" => self.value(),
            Token::Empty(tag) if tag == "value" => Ok(Value::String(String::new())),
            other => Err(unexpected(&other, "<value>")),
        }
    }

    /// Body of a `<value>` whose opening tag was consumed, through `</value>`.
    ///
    /// Text without a type element is a string.
    fn value(&mut self) -> Result<Value> {
        let mut untyped = String::new();
        loop {
            match self.next()? {
                Token::Text(chunk) => untyped.push_str(&chunk),
                Token::Close(tag) if tag == "value" => return Ok(Value::String(untyped)),
                Token::Open(tag) => {
                    let value = self.typed(&tag)?;
                    self.expect_close("value")?;
                    return Ok(value);
                }
                Token::Empty(tag) => {
                    let value = empty_typed(&tag)?;
                    self.expect_close("value")?;
                    return Ok(value);
                }
                other => return Err(unexpected(&other, "</value>")),
            }
        }
    }

    fn typed(&mut self, tag: &str) -> Result<Value> {
        match tag {
            "int" | "i4" | "i8" => {
                let text = self.text(tag)?;
                text.trim().parse::<i64>().map(Value::from).map_err(|e| {
                    Error::invalid_response(format!("bad <{tag}> '{text}': {e}"))
                })
            }
            "boolean" => {
                let text = self.text(tag)?;
                match text.trim() {
                    "1" => Ok(Value::Bool(true)),
                    "0" => Ok(Value::Bool(false)),
                    other => Err(Error::invalid_response(format!("bad <boolean> '{other}'"))),
                }
            }
            "double" => {
                let text = self.text(tag)?;
                text.trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| Error::invalid_response(format!("bad <double> '{text}'")))
            }
            "string" | "base64" | "dateTime.iso8601" => self.text(tag).map(Value::String),
            "nil" => {
                self.expect_close("nil")?;
                Ok(Value::Null)
            }
            "array" => self.array(),
            "struct" => self.structure(),
            other => Err(Error::invalid_response(format!(
                "unsupported XML-RPC type <{other}>"
            ))),
        }
    }

    fn array(&mut self) -> Result<Value> {
        let mut items = Vec::new();
        match self.next_tag()? {
            Token::Open(tag) if tag == "data" => loop {
                match self.next_tag()? {
                    Token::Open(tag) if tag == "value" => items.push(self.value()?),
                    Token::Empty(tag) if tag == "value" => items.push(Value::String(String::new())),
                    Token::Close(tag) if tag == "data" => break,
                    other => return Err(unexpected(&other, "<value>")),
                }
            },
            Token::Empty(tag) if tag == "data" => {}
            other => return Err(unexpected(&other, "<data>")),
        }
        self.expect_close("array")?;
        Ok(Value::Array(items))
    }

    fn structure(&mut self) -> Result<Value> {
        let mut members = Map::new();
        loop {
            match self.next_tag()? {
                Token::Open(tag) if tag == "member" => {
                    self.expect_open("name")?;
                    let name = self.text("name")?;
                    let value = self.value_element()?;
                    self.expect_close("member")?;
                    members.insert(name, value);
                }
                Token::Close(tag) if tag == "struct" => return Ok(Value::Object(members)),
                other => return Err(unexpected(&other, "<member>")),
            }
        }
    }
}

fn empty_typed(tag: &str) -> Result<Value> {
    match tag {
        "nil" => Ok(Value::Null),
        "string" | "base64" | "dateTime.iso8601" => Ok(Value::String(String::new())),
        "array" => Ok(Value::Array(Vec::new())),
        "struct" => Ok(Value::Object(Map::new())),
        other => Err(Error::invalid_response(format!("empty <{other}/>"))),
    }
}

fn tag_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn malformed(error: impl std::fmt::Display) -> Error {
    Error::invalid_response(format!("malformed XML-RPC document: {error}"))
}

fn unexpected(found: &Token, expected: &str) -> Error {
    Error::invalid_response(format!("expected {expected}, found {found:?}"))
}
