//! Features shipped with roost.

pub mod auto_reply;
pub mod event_logger;
pub mod word_filter;

use crate::{catalog::FeatureCatalog, feature::Feature};

pub use {auto_reply::AutoReply, event_logger::EventLogger, word_filter::WordFilter};

pub(crate) fn register_all(catalog: &mut FeatureCatalog) {
    catalog.register(event_logger::CLASS, |ctx| {
        Ok(Box::new(EventLogger::from_context(ctx)?) as Box<dyn Feature>)
    });
    catalog.register(word_filter::CLASS, |ctx| {
        Ok(Box::new(WordFilter::from_context(ctx)?) as Box<dyn Feature>)
    });
    catalog.register(auto_reply::CLASS, |ctx| {
        Ok(Box::new(AutoReply::from_context(ctx)?) as Box<dyn Feature>)
    });
}
