//! Reference content payload types
//!
//! The engine only depends on the `Content` trait; these two types give
//! collaborators (and tests) a minimal text widget and a titled
//! container to build pages out of.

use crate::node::Content;
use std::any::Any;

/// Plain text payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Text {
    /// Text body
    pub body: String,
}

impl Text {
    /// Create a text payload
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }
}

impl Content for Text {
    fn clone_content(&self) -> Box<dyn Content> {
        Box::new(self.clone())
    }

    fn content_eq(&self, other: &dyn Content) -> bool {
        other
            .as_any()
            .downcast_ref::<Text>()
            .map_or(false, |o| o == self)
    }

    fn render(&self) -> String {
        self.body.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Titled container payload, holds child widgets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section title
    pub title: String,
}

impl Section {
    /// Create a section payload
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

impl Content for Section {
    fn clone_content(&self) -> Box<dyn Content> {
        Box::new(self.clone())
    }

    fn content_eq(&self, other: &dyn Content) -> bool {
        other
            .as_any()
            .downcast_ref::<Section>()
            .map_or(false, |o| o == self)
    }

    fn render(&self) -> String {
        format!("[{}]", self.title)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
