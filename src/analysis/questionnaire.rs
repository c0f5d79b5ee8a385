//! The questionnaire template as a typed tree.
//!
//! Parsing rules:
//! - a string inside an array is a question ([`Node::Leaf`]);
//! - an object with `question_text` is a question with extra fields and,
//!   optionally, `sub_questions` of the same shape ([`Node::ComplexLeaf`]);
//! - other objects and arrays are structure; everything else is kept verbatim.
//!
//! Filling collects the questions in document order, takes one answer per
//! question, and renders a document with the template's exact shape plus an
//! `answer` at every question.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;

pub const QUESTION_TEXT: &str = "question_text";
pub const SUB_QUESTIONS: &str = "sub_questions";
pub const ANSWER: &str = "answer";
pub const QUESTION: &str = "question";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{path}: question_text must be a string")]
    InvalidQuestionText { path: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(String),
    ComplexLeaf {
        text: String,
        /// Every field of the object in order, `sub_questions` included as written.
        fields: Map<String, Value>,
        sub_questions: Option<Box<Node>>,
    },
    Group(Vec<(String, Node)>),
    Sequence(Vec<Node>),
    Literal(Value),
}

impl Node {
    fn parse(value: Value, path: &str, in_array: bool) -> Result<Node, TemplateError> {
        match value {
            Value::String(s) if in_array => Ok(Node::Leaf(s)),
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| Node::parse(v, &format!("{}/{}", path, i), true))
                .collect::<Result<Vec<_>, _>>()
                .map(Node::Sequence),
            Value::Object(fields) if fields.contains_key(QUESTION_TEXT) => {
                let text = match fields.get(QUESTION_TEXT) {
                    Some(Value::String(s)) => s.clone(),
                    _ => {
                        return Err(TemplateError::InvalidQuestionText {
                            path: format!("{}/{}", path, QUESTION_TEXT),
                        });
                    }
                };
                let sub_questions = match fields.get(SUB_QUESTIONS) {
                    Some(sub) => Some(Box::new(Node::parse(
                        sub.clone(),
                        &format!("{}/{}", path, SUB_QUESTIONS),
                        false,
                    )?)),
                    None => None,
                };
                Ok(Node::ComplexLeaf {
                    text,
                    fields,
                    sub_questions,
                })
            }
            Value::Object(fields) => fields
                .into_iter()
                .map(|(k, v)| {
                    let child = Node::parse(v, &format!("{}/{}", path, k), false)?;
                    Ok((k, child))
                })
                .collect::<Result<Vec<_>, TemplateError>>()
                .map(Node::Group),
            other => Ok(Node::Literal(other)),
        }
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Node::Leaf(text) => out.push(text),
            Node::ComplexLeaf {
                text,
                sub_questions,
                ..
            } => {
                out.push(text);
                if let Some(sub) = sub_questions {
                    sub.collect(out);
                }
            }
            Node::Group(entries) => entries.iter().for_each(|(_, n)| n.collect(out)),
            Node::Sequence(items) => items.iter().for_each(|n| n.collect(out)),
            Node::Literal(_) => {}
        }
    }

    fn render(&self, answers: &mut impl Iterator<Item = String>) -> Value {
        match self {
            Node::Leaf(text) => {
                let mut obj = Map::new();
                obj.insert(QUESTION.to_string(), Value::String(text.clone()));
                obj.insert(ANSWER.to_string(), Value::String(answers.next().unwrap_or_default()));
                Value::Object(obj)
            }
            Node::ComplexLeaf {
                fields,
                sub_questions,
                ..
            } => {
                // The parent is asked before its sub-questions
                let answer = answers.next().unwrap_or_default();
                let mut obj = Map::new();
                for (key, value) in fields {
                    let rendered = match (key.as_str(), sub_questions) {
                        (SUB_QUESTIONS, Some(sub)) => sub.render(answers),
                        _ => value.clone(),
                    };
                    obj.insert(key.clone(), rendered);
                }
                obj.insert(ANSWER.to_string(), Value::String(answer));
                Value::Object(obj)
            }
            Node::Group(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, n)| (k.clone(), n.render(answers)))
                    .collect(),
            ),
            Node::Sequence(items) => {
                Value::Array(items.iter().map(|n| n.render(answers)).collect())
            }
            Node::Literal(value) => value.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Questionnaire {
    root: Node,
}

impl Questionnaire {
    pub fn parse(json: &str) -> Result<Self, TemplateError> {
        let value: Value = serde_json::from_str(json)?;
        Ok(Self {
            root: Node::parse(value, "", false)?,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read questionnaire {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("Invalid questionnaire {:?}", path))
    }

    /// Question texts in the order they are answered.
    pub fn questions(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.root.collect(&mut out);
        out
    }

    /// The template with `answers` attached, one per entry of [`questions`](Self::questions).
    ///
    /// Questions without an answer get an empty string.
    pub fn render(&self, answers: Vec<String>) -> Value {
        self.root.render(&mut answers.into_iter())
    }
}
