//! Scripted [`FeatureSource`] and response builders for tests.
//!
//! [`ScriptedSource`] serves `GetFeature` documents for a layer of
//! `total` cadastral features with identifiers `1..=total`, one unit square
//! each. Failures can be scripted per `startIndex`, and the source records
//! every call so tests can check concurrency and pacing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::wfs::{FeatureSource, TransportError};

const URL: &str = "https://wfs.test/scripted";

/// Registration stamp given to features without an override.
pub const DEFAULT_REGISTRATION: &str = "2021-01-01T00:00:00.000000Z";

/// A scripted failure for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Connection reset.
    Network,
    /// Non-success HTTP status.
    Status(u16),
    /// HTTP 429 with the given `Retry-After`.
    RateLimited(Duration),
    /// A body that is not well-formed XML.
    Malformed,
}

impl Failure {
    fn into_response(self) -> Result<String, TransportError> {
        match self {
            Self::Network => Err(TransportError::Network {
                url: URL.to_owned(),
                source: io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"),
            }),
            Self::Status(status) => Err(TransportError::Http {
                url: URL.to_owned(),
                status,
                message: "scripted status".to_owned(),
            }),
            Self::RateLimited(retry_after) => Err(TransportError::RateLimited {
                url: URL.to_owned(),
                retry_after,
            }),
            Self::Malformed => Ok("<wfs:FeatureCollection><wfs:member>".to_owned()),
        }
    }
}

/// One request received by a [`ScriptedSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedCall {
    /// Requested `startIndex`.
    pub start_index: u64,
    /// Requested `count`.
    pub count: u64,
    /// Time the call arrived.
    pub at: Instant,
}

#[derive(Debug, Default)]
struct Script {
    next: HashMap<u64, VecDeque<Failure>>,
    always: HashMap<u64, Failure>,
    registrations: HashMap<i64, Option<String>>,
    extra: HashMap<u64, Vec<String>>,
    calls: Vec<RecordedCall>,
}

/// In-memory WFS double.
#[derive(Debug)]
pub struct ScriptedSource {
    total: u64,
    latency: Option<Duration>,
    script: Mutex<Script>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedSource {
    /// Serve a layer of `total` features.
    #[must_use]
    pub fn new(total: u64) -> Self {
        Self {
            total,
            latency: None,
            script: Mutex::default(),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Delay every answer by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next call for `start_index` with `failure`. Repeated calls
    /// queue further failures.
    #[must_use]
    pub fn failing_once(self, start_index: u64, failure: Failure) -> Self {
        self.lock()
            .next
            .entry(start_index)
            .or_default()
            .push_back(failure);
        self
    }

    /// Fail every call for `start_index` with `failure`.
    #[must_use]
    pub fn failing_always(self, start_index: u64, failure: Failure) -> Self {
        self.lock().always.insert(start_index, failure);
        self
    }

    /// Give feature `id` the registration stamp `registered` (or none).
    #[must_use]
    pub fn with_registration(self, id: i64, registered: Option<&str>) -> Self {
        self.lock()
            .registrations
            .insert(id, registered.map(str::to_owned));
        self
    }

    /// Append a hand-written feature element to the page at `start_index`.
    #[must_use]
    pub fn with_extra_feature(self, start_index: u64, feature: String) -> Self {
        self.lock().extra.entry(start_index).or_default().push(feature);
        self
    }

    /// Calls received so far, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Highest number of concurrent calls observed.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn answer(&self, start_index: u64, count: u64) -> Result<String, TransportError> {
        let mut script = self.lock();
        let queued = script
            .next
            .get_mut(&start_index)
            .and_then(VecDeque::pop_front);
        let failure = queued.or_else(|| script.always.get(&start_index).cloned());
        if let Some(failure) = failure {
            return failure.into_response();
        }

        let end = start_index.saturating_add(count).min(self.total);
        let mut features: Vec<String> = (start_index..end)
            .map(|offset| {
                let id = i64::try_from(offset + 1).unwrap_or(i64::MAX);
                let registered = script
                    .registrations
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| Some(DEFAULT_REGISTRATION.to_owned()));
                feature_xml(id, registered.as_deref())
            })
            .collect();
        if let Some(extra) = script.extra.get(&start_index) {
            features.extend(extra.iter().cloned());
        }
        Ok(collection_xml(Some(self.total), &features))
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl FeatureSource for ScriptedSource {
    async fn get_page(&self, start_index: u64, count: u64) -> Result<String, TransportError> {
        self.lock().calls.push(RecordedCall {
            start_index,
            count,
            at: Instant::now(),
        });
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.answer(start_index, count)
    }
}

/// Cadastral feature element with a unit square placed at `id`.
#[must_use]
pub fn feature_xml(id: i64, registered: Option<&str>) -> String {
    let x = f64::from(i32::try_from(id).unwrap_or(0)) * 2.0;
    let ring = format!(
        "{x} 0 0 {x1} 0 0 {x1} 1 0 {x} 1 0 {x} 0 0",
        x1 = x + 1.0
    );
    let stamp = registered.map_or_else(String::new, |stamp| {
        format!("<mat:registreringFra>{stamp}</mat:registreringFra>")
    });
    format!(
        "<wfs:member><mat:SamletFastEjendom_Gaeldende gml:id=\"f{id}\">\
         <mat:BFEnummer>{id}</mat:BFEnummer>{stamp}\
         <mat:geometri><gml:Polygon srsName=\"EPSG:25832\"><gml:exterior><gml:LinearRing>\
         <gml:posList>{ring}</gml:posList>\
         </gml:LinearRing></gml:exterior></gml:Polygon></mat:geometri>\
         </mat:SamletFastEjendom_Gaeldende></wfs:member>"
    )
}

/// Feature collection wrapping `features`.
#[must_use]
pub fn collection_xml(number_matched: Option<u64>, features: &[String]) -> String {
    let matched = number_matched.map_or_else(|| "unknown".to_owned(), |total| total.to_string());
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <wfs:FeatureCollection xmlns:wfs=\"http://www.opengis.net/wfs/2.0\" \
         xmlns:gml=\"http://www.opengis.net/gml/3.2\" \
         xmlns:mat=\"http://data.gov.dk/schemas/matrikel/1/gml3\" \
         numberMatched=\"{matched}\" numberReturned=\"{returned}\">{body}</wfs:FeatureCollection>",
        returned = features.len(),
        body = features.concat(),
    )
}

/// Start indices of page requests `source` received, leaving out the
/// one-feature total probe.
#[must_use]
pub fn requested_offsets(source: &ScriptedSource) -> HashSet<u64> {
    source
        .calls()
        .into_iter()
        .filter(|call| call.count > 1)
        .map(|call| call.start_index)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::CADASTRAL;
    use crate::wfs::decode_page;
    use rstest::rstest;

    #[rstest]
    #[case(Some("2021-03-04T05:06:07Z"))]
    #[case(None)]
    fn feature_fixture_decodes(#[case] registered: Option<&str>) {
        let xml = collection_xml(Some(1), &[feature_xml(7, registered)]);
        let page = decode_page(&xml, &CADASTRAL).expect("fixture decodes");

        assert_eq!(page.number_matched, Some(1));
        let feature = page.features.first().expect("one feature");
        assert_eq!(feature.field("BFEnummer"), Some("7"));
        assert_eq!(feature.field("registreringFra"), registered);
        assert!(feature.geometry.is_some());
    }
}
