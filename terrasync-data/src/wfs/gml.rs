//! Decoding of `GetFeature` response documents.
//!
//! The decoder is a single pass over `quick-xml` events. Elements are matched
//! by local name, so namespace prefixes chosen by the service do not matter.
//! Every direct child of a feature element becomes a `(name, text)` pair,
//! except the geometry property, whose `posList` texts and first `srsName`
//! are collected into a [`RawGeometry`].

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use terrasync_core::{RawFeature, RawGeometry};

use super::error::GmlError;
use crate::layers::WfsLayer;

const POS_LIST: &str = "posList";
const SRS_NAME: &[u8] = b"srsName";
const EXCEPTION_REPORT: &str = "ExceptionReport";

/// One decoded response page.
#[derive(Debug, Default)]
pub struct FeaturePage {
    /// Total features matching the query, when the service declares it.
    pub number_matched: Option<u64>,
    /// Features in this page as declared by the service.
    pub number_returned: Option<u64>,
    /// Decoded feature elements, in document order.
    pub features: Vec<RawFeature>,
}

/// Decode a response document for `layer`.
///
/// # Errors
///
/// Returns [`GmlError`] when the document is not well-formed, is empty, ends
/// early, or is an OWS exception report.
pub fn decode_page(xml: &str, layer: &WfsLayer) -> Result<FeaturePage, GmlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut decoder = Decoder::new(layer);
    loop {
        match reader.read_event()? {
            Event::Start(element) => decoder.open(&element, false)?,
            Event::Empty(element) => decoder.open(&element, true)?,
            Event::End(_) => decoder.close(),
            Event::Text(text) => decoder.text(&text.unescape()?),
            Event::CData(data) => decoder.text(&String::from_utf8_lossy(&data.into_inner())),
            Event::Eof => return decoder.finish(),
            _ => {}
        }
    }
}

struct OpenFeature {
    depth: usize,
    fields: Vec<(String, String)>,
    geometry: Option<RawGeometry>,
}

enum Capture {
    None,
    Field { name: String, text: String },
    PosList(String),
}

struct Decoder<'a> {
    layer: &'a WfsLayer,
    stack: Vec<String>,
    saw_root: bool,
    exception: Option<Vec<String>>,
    page: FeaturePage,
    feature: Option<OpenFeature>,
    geometry_depth: Option<usize>,
    capture: Capture,
}

impl<'a> Decoder<'a> {
    fn new(layer: &'a WfsLayer) -> Self {
        Self {
            layer,
            stack: Vec::new(),
            saw_root: false,
            exception: None,
            page: FeaturePage::default(),
            feature: None,
            geometry_depth: None,
            capture: Capture::None,
        }
    }

    fn open(&mut self, element: &BytesStart<'_>, empty: bool) -> Result<(), GmlError> {
        let name = local_name(element);
        let depth = self.stack.len();

        if !self.saw_root {
            self.saw_root = true;
            self.read_root(element, &name)?;
        } else if let Some(feature) = self.feature.as_mut() {
            if self.geometry_depth.is_some() {
                if let Some(geometry) = feature.geometry.as_mut() {
                    if geometry.srs_name.is_none() {
                        geometry.srs_name = attribute(element, SRS_NAME)?;
                    }
                }
                if name == POS_LIST {
                    self.capture = Capture::PosList(String::new());
                }
            } else if depth == feature.depth + 1 {
                if name == self.layer.geometry_element {
                    feature.geometry.get_or_insert_with(RawGeometry::default);
                    self.geometry_depth = Some(depth);
                } else {
                    self.capture = Capture::Field {
                        name: name.clone(),
                        text: String::new(),
                    };
                }
            } else {
                // Nested structure inside a scalar property is not a scalar.
                self.capture = Capture::None;
            }
        } else if name == self.layer.feature_element {
            self.feature = Some(OpenFeature {
                depth,
                fields: Vec::new(),
                geometry: None,
            });
        }

        self.stack.push(name);
        if empty {
            self.close();
        }
        Ok(())
    }

    fn read_root(&mut self, element: &BytesStart<'_>, name: &str) -> Result<(), GmlError> {
        if name == EXCEPTION_REPORT {
            self.exception = Some(Vec::new());
            return Ok(());
        }
        self.page.number_matched = attribute(element, b"numberMatched")?
            .and_then(|value| value.parse().ok());
        self.page.number_returned = attribute(element, b"numberReturned")?
            .and_then(|value| value.parse().ok());
        Ok(())
    }

    fn text(&mut self, text: &str) {
        if let Some(messages) = self.exception.as_mut() {
            messages.push(text.to_owned());
            return;
        }
        match &mut self.capture {
            Capture::Field { text: buffer, .. } | Capture::PosList(buffer) => {
                buffer.push_str(text);
            }
            Capture::None => {}
        }
    }

    fn close(&mut self) {
        let Some(name) = self.stack.pop() else {
            return;
        };
        let depth = self.stack.len();
        let Some(feature) = self.feature.as_mut() else {
            return;
        };

        if depth == feature.depth {
            if let Some(done) = self.feature.take() {
                self.page.features.push(RawFeature {
                    fields: done.fields,
                    geometry: done.geometry,
                });
            }
            self.geometry_depth = None;
            self.capture = Capture::None;
            return;
        }

        if self.geometry_depth == Some(depth) {
            self.geometry_depth = None;
            return;
        }

        match std::mem::replace(&mut self.capture, Capture::None) {
            Capture::PosList(text) if name == POS_LIST => {
                if let Some(geometry) = feature.geometry.as_mut() {
                    geometry.pos_lists.push(text);
                }
            }
            Capture::Field { name: field, text } if field == name => {
                feature.fields.push((field, text));
            }
            other => self.capture = other,
        }
    }

    fn finish(self) -> Result<FeaturePage, GmlError> {
        if !self.saw_root {
            return Err(GmlError::MissingRoot);
        }
        if let Some(element) = self.stack.last() {
            return Err(GmlError::Truncated {
                element: element.clone(),
            });
        }
        if let Some(messages) = self.exception {
            return Err(GmlError::ServiceException {
                message: messages.join("; "),
            });
        }
        Ok(self.page)
    }
}

fn local_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, GmlError> {
    for attr in element.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.local_name().as_ref() == key {
            let value: Cow<'_, str> = attr.unescape_value()?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}
