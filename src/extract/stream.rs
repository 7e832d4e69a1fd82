use time::OffsetDateTime;

use crate::error::SourceError;
use crate::source::{DataSource, Fetch, HistoryKey, Sample};

/// An open history cursor that is cancelled exactly once.
///
/// The cancel is issued by [`HistoryStream::close`] or, failing that, on
/// drop, so early returns and unwinding release the cursor as well.
pub struct HistoryStream<'a, S: DataSource + ?Sized> {
    source: &'a S,
    key: HistoryKey,
    exhausted: Option<i32>,
    released: bool,
}

impl<'a, S: DataSource + ?Sized> HistoryStream<'a, S> {
    pub fn open(
        source: &'a S,
        tag: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Self, SourceError> {
        let key = source.open_history(tag, start, end)?;
        Ok(Self {
            source,
            key,
            exhausted: None,
            released: false,
        })
    }

    pub fn key(&self) -> HistoryKey {
        self.key
    }

    /// Result code that ended the stream, once it has ended.
    pub fn exhausted_code(&self) -> Option<i32> {
        self.exhausted
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.source.cancel(self.key);
        }
    }
}

impl<S: DataSource + ?Sized> Iterator for HistoryStream<'_, S> {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        if self.exhausted.is_some() || self.released {
            return None;
        }
        match self.source.fetch_next(self.key) {
            Fetch::Sample(sample) => Some(sample),
            Fetch::Exhausted(code) => {
                self.exhausted = Some(code);
                None
            }
        }
    }
}

impl<S: DataSource + ?Sized> Drop for HistoryStream<'_, S> {
    fn drop(&mut self) {
        self.release();
    }
}
