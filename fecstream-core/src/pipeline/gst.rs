//! GStreamer backend.
//!
//! Elements are looked up by name in one `gst::Pipeline`. Property values
//! are converted to the exact type the element declares, so enum and
//! flag properties accept their integer form. Bus messages are forwarded
//! from the sync handler into the typed channel without blocking the
//! posting thread.

use std::sync::Mutex;

use gstreamer as gst;
use gst::glib;
use gst::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::pipeline::{
    BusEvent, BusReceiver, BusSender, ElementHandle, MediaPipeline, PadAddedHandler, PipelineState,
};
use crate::value::{Structure, Value};

pub struct GstPipeline {
    pipeline: gst::Pipeline,
    bus_tx: BusSender,
    bus_rx: Mutex<Option<BusReceiver>>,
}

impl GstPipeline {
    /// Initialise GStreamer and create an empty pipeline.
    pub fn new() -> Result<Self, PipelineError> {
        gst::init().map_err(|e| PipelineError::Backend(format!("gstreamer init: {e}")))?;

        let pipeline = gst::Pipeline::new();
        let (bus_tx, bus_rx) = mpsc::unbounded_channel();

        let bus = pipeline
            .bus()
            .ok_or_else(|| PipelineError::Backend("pipeline has no bus".into()))?;
        let tx = bus_tx.clone();
        bus.set_sync_handler(move |_, msg| {
            if let Some(event) = convert_message(msg) {
                let _ = tx.send(event);
            }
            gst::BusSyncReply::Drop
        });

        Ok(Self {
            pipeline,
            bus_tx,
            bus_rx: Mutex::new(Some(bus_rx)),
        })
    }

    fn element(&self, handle: &ElementHandle) -> Result<gst::Element, PipelineError> {
        self.pipeline
            .by_name(handle.name())
            .ok_or_else(|| PipelineError::UnknownElement(handle.name().to_string()))
    }
}

impl Drop for GstPipeline {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("failed to stop pipeline on drop: {e}");
        }
        if let Some(bus) = self.pipeline.bus() {
            bus.unset_sync_handler();
        }
    }
}

impl MediaPipeline for GstPipeline {
    fn make_element(&self, factory: &str, name: &str) -> Result<ElementHandle, PipelineError> {
        if self.pipeline.by_name(name).is_some() {
            return Err(PipelineError::DuplicateElement(name.to_string()));
        }
        let element = gst::ElementFactory::make(factory)
            .name(name)
            .build()
            .map_err(|_| PipelineError::UnknownFactory(factory.to_string()))?;
        self.pipeline
            .add(&element)
            .map_err(|e| PipelineError::Backend(format!("add {name}: {e}")))?;
        Ok(ElementHandle::new(name, factory))
    }

    fn set_property(
        &self,
        element: &ElementHandle,
        property: &str,
        value: Value,
    ) -> Result<(), PipelineError> {
        let el = self.element(element)?;
        let pspec = el
            .find_property(property)
            .ok_or_else(|| PipelineError::UnknownProperty {
                element: element.name().to_string(),
                property: property.to_string(),
            })?;
        let converted = to_glib_value(&value, pspec.value_type()).map_err(|reason| {
            PipelineError::PropertyType {
                element: element.name().to_string(),
                property: property.to_string(),
                reason,
            }
        })?;
        el.set_property_from_value(property, &converted);
        Ok(())
    }

    fn property(&self, element: &ElementHandle, property: &str) -> Result<Value, PipelineError> {
        let el = self.element(element)?;
        if el.find_property(property).is_none() {
            return Err(PipelineError::UnknownProperty {
                element: element.name().to_string(),
                property: property.to_string(),
            });
        }
        let value = el.property_value(property);
        from_glib_value(&value).ok_or_else(|| PipelineError::PropertyType {
            element: element.name().to_string(),
            property: property.to_string(),
            reason: format!("unsupported type {}", value.type_()),
        })
    }

    fn link(&self, src: &ElementHandle, sink: &ElementHandle) -> Result<(), PipelineError> {
        let a = self.element(src)?;
        let b = self.element(sink)?;
        a.link(&b).map_err(|_| PipelineError::LinkRefused {
            src: src.name().to_string(),
            src_pad: "src".to_string(),
            sink: sink.name().to_string(),
            sink_pad: "sink".to_string(),
        })
    }

    fn link_pads(
        &self,
        src: &ElementHandle,
        src_pad: &str,
        sink: &ElementHandle,
        sink_pad: &str,
    ) -> Result<(), PipelineError> {
        let a = self.element(src)?;
        let b = self.element(sink)?;
        a.link_pads(Some(src_pad), &b, Some(sink_pad))
            .map_err(|_| PipelineError::LinkRefused {
                src: src.name().to_string(),
                src_pad: src_pad.to_string(),
                sink: sink.name().to_string(),
                sink_pad: sink_pad.to_string(),
            })
    }

    fn request_pad(
        &self,
        element: &ElementHandle,
        template: &str,
    ) -> Result<String, PipelineError> {
        let el = self.element(element)?;
        el.request_pad_simple(template)
            .map(|pad| pad.name().to_string())
            .ok_or_else(|| PipelineError::RequestPadRefused {
                element: element.name().to_string(),
                template: template.to_string(),
            })
    }

    fn set_state(&self, state: PipelineState) -> Result<(), PipelineError> {
        let target = match state {
            PipelineState::Null => gst::State::Null,
            PipelineState::Ready => gst::State::Ready,
            PipelineState::Paused => gst::State::Paused,
            PipelineState::Playing => gst::State::Playing,
        };
        self.pipeline
            .set_state(target)
            .map(|change| debug!(?change, %state, "state change requested"))
            .map_err(|e| PipelineError::StateChange(format!("{state}: {e}")))
    }

    fn take_bus(&self) -> Result<BusReceiver, PipelineError> {
        self.bus_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(PipelineError::BusTaken)
    }

    fn post(&self, event: BusEvent) -> Result<(), PipelineError> {
        self.bus_tx.send(event).map_err(|_| PipelineError::BusClosed)
    }

    fn connect_pad_added(
        &self,
        element: &ElementHandle,
        handler: PadAddedHandler,
    ) -> Result<(), PipelineError> {
        let el = self.element(element)?;
        el.connect_pad_added(move |_, pad| handler(pad.name().as_str()));
        Ok(())
    }

    fn session_stats(&self, relay: &ElementHandle, session: u32) -> Option<Structure> {
        let el = self.element(relay).ok()?;
        let internal =
            el.emit_by_name::<Option<glib::Object>>("get-internal-session", &[&session])?;
        let stats = internal.property::<gst::Structure>("stats");
        Some(from_gst_structure(&stats))
    }
}

// ── Conversions ──────────────────────────────────────────────────

fn convert_message(msg: &gst::Message) -> Option<BusEvent> {
    use gst::MessageView;

    let source = msg
        .src()
        .map(|s| s.name().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    match msg.view() {
        MessageView::Error(e) => Some(BusEvent::Error {
            source,
            message: e.error().to_string(),
            debug: e.debug().map(|d| d.to_string()),
        }),
        MessageView::Warning(w) => Some(BusEvent::Warning {
            source,
            message: w.error().to_string(),
            debug: w.debug().map(|d| d.to_string()),
        }),
        MessageView::StateChanged(s) => Some(BusEvent::StateChanged {
            source,
            old: from_gst_state(s.old()),
            new: from_gst_state(s.current()),
        }),
        MessageView::Eos(_) => Some(BusEvent::Eos),
        _ => None,
    }
}

fn from_gst_state(state: gst::State) -> PipelineState {
    match state {
        gst::State::Ready => PipelineState::Ready,
        gst::State::Paused => PipelineState::Paused,
        gst::State::Playing => PipelineState::Playing,
        _ => PipelineState::Null,
    }
}

fn int_of(value: &Value) -> Option<i64> {
    match value {
        Value::Int(v) => Some(*v),
        Value::UInt(v) => i64::try_from(*v).ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Convert `value` to the declared type `ty` of a property.
fn to_glib_value(value: &Value, ty: glib::Type) -> Result<glib::Value, String> {
    let mismatch = || format!("cannot convert {value:?} to {ty}");
    let int = || int_of(value).ok_or_else(mismatch);

    if ty == glib::Type::BOOL {
        return match value {
            Value::Bool(b) => Ok(b.to_value()),
            _ => Err(mismatch()),
        };
    }
    if ty == glib::Type::STRING {
        return value.as_str().map(|s| s.to_value()).ok_or_else(mismatch);
    }
    if ty == glib::Type::I32 {
        return i32::try_from(int()?).map(|v| v.to_value()).map_err(|_| mismatch());
    }
    if ty == glib::Type::U32 {
        return u32::try_from(int()?).map(|v| v.to_value()).map_err(|_| mismatch());
    }
    if ty == glib::Type::I64 {
        return int().map(|v| v.to_value());
    }
    if ty == glib::Type::U64 {
        return value.as_u64().map(|v| v.to_value()).ok_or_else(mismatch);
    }
    if ty == glib::Type::F64 {
        return value.as_f64().map(|v| v.to_value()).ok_or_else(mismatch);
    }
    if ty == glib::Type::F32 {
        return value.as_f64().map(|v| (v as f32).to_value()).ok_or_else(mismatch);
    }
    if ty.is_a(glib::Type::ENUM) {
        let v = i32::try_from(int()?).map_err(|_| mismatch())?;
        return glib::EnumClass::with_type(ty)
            .and_then(|class| class.to_value(v))
            .ok_or_else(mismatch);
    }
    if ty.is_a(glib::Type::FLAGS) {
        let v = u32::try_from(int()?).map_err(|_| mismatch())?;
        return glib::FlagsClass::with_type(ty)
            .and_then(|class| class.to_value(v))
            .ok_or_else(mismatch);
    }
    if ty == gst::Caps::static_type() {
        return match value {
            Value::Caps(s) => {
                let caps = gst::Caps::builder_full()
                    .structure(to_gst_structure(s)?)
                    .build();
                Ok(caps.to_value())
            }
            _ => Err(mismatch()),
        };
    }
    if ty == gst::Structure::static_type() {
        return match value {
            Value::Structure(s) => Ok(to_gst_structure(s)?.to_value()),
            _ => Err(mismatch()),
        };
    }

    Err(mismatch())
}

fn to_gst_structure(s: &Structure) -> Result<gst::Structure, String> {
    let mut out = gst::Structure::new_empty(s.name());
    for (field, value) in s.fields() {
        out.set_value(field, to_send_value(value)?);
    }
    Ok(out)
}

fn to_send_value(value: &Value) -> Result<glib::SendValue, String> {
    Ok(match value {
        Value::Bool(b) => b.to_send_value(),
        Value::Int(v) => match i32::try_from(*v) {
            Ok(small) => small.to_send_value(),
            Err(_) => v.to_send_value(),
        },
        Value::UInt(v) => match u32::try_from(*v) {
            Ok(small) => small.to_send_value(),
            Err(_) => v.to_send_value(),
        },
        Value::Double(v) => v.to_send_value(),
        Value::Str(s) => s.to_send_value(),
        Value::Fraction(n, d) => gst::Fraction::new(*n, *d).to_send_value(),
        Value::Structure(s) => to_gst_structure(s)?.to_send_value(),
        Value::Caps(s) => gst::Caps::builder_full()
            .structure(to_gst_structure(s)?)
            .build()
            .to_send_value(),
        Value::List(items) => gst::List::new(
            items
                .iter()
                .map(to_send_value)
                .collect::<Result<Vec<_>, _>>()?,
        )
        .to_send_value(),
        Value::Array(items) => gst::Array::new(
            items
                .iter()
                .map(to_send_value)
                .collect::<Result<Vec<_>, _>>()?,
        )
        .to_send_value(),
    })
}

fn from_glib_value(value: &glib::Value) -> Option<Value> {
    let ty = value.type_();
    if let Ok(v) = value.get::<bool>() {
        return Some(Value::Bool(v));
    }
    if let Ok(v) = value.get::<i32>() {
        return Some(Value::Int(i64::from(v)));
    }
    if let Ok(v) = value.get::<u32>() {
        return Some(Value::UInt(u64::from(v)));
    }
    if let Ok(v) = value.get::<i64>() {
        return Some(Value::Int(v));
    }
    if let Ok(v) = value.get::<u64>() {
        return Some(Value::UInt(v));
    }
    if let Ok(v) = value.get::<f64>() {
        return Some(Value::Double(v));
    }
    if let Ok(v) = value.get::<f32>() {
        return Some(Value::Double(f64::from(v)));
    }
    if ty == glib::Type::STRING {
        return value
            .get::<Option<String>>()
            .ok()
            .map(|s| Value::Str(s.unwrap_or_default()));
    }
    if let Ok(f) = value.get::<gst::Fraction>() {
        return Some(Value::Fraction(f.numer(), f.denom()));
    }
    if let Ok(s) = value.get::<gst::Structure>() {
        return Some(Value::Structure(from_gst_structure(&s)));
    }
    if let Ok(list) = value.get::<gst::List>() {
        return Some(Value::List(list.iter().filter_map(|v| from_glib_value(v)).collect()));
    }
    if let Ok(array) = value.get::<gst::Array>() {
        return Some(Value::Array(array.iter().filter_map(|v| from_glib_value(v)).collect()));
    }
    if let Ok(array) = value.get::<glib::ValueArray>() {
        return Some(Value::Array(array.iter().filter_map(from_glib_value).collect()));
    }
    if let Ok(obj) = value.get::<glib::Object>() {
        // Session statistics nest per-source objects carrying their own stats.
        let has_stats = obj
            .find_property("stats")
            .is_some_and(|p| p.value_type() == gst::Structure::static_type());
        if has_stats {
            let stats = obj.property::<gst::Structure>("stats");
            return Some(Value::Structure(from_gst_structure(&stats)));
        }
    }
    None
}

fn from_gst_structure(s: &gst::StructureRef) -> Structure {
    let mut out = Structure::new(s.name().as_str());
    for (field, value) in s.iter() {
        if let Some(v) = from_glib_value(value) {
            out.set(field.as_str(), v);
        }
    }
    out
}
