//! Composite containers (tabs, split panes) driving a `RelayBus` from a
//! panel manifest.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use viewlink_core::error::{Result, ViewLinkError};
use viewlink_core::protocol::bus::ViewMessage;
use viewlink_core::protocol::envelope::Envelope;

use crate::frame::FramePort;
use crate::relay::bus::{RelayBus, Routed};

/// One panel/tab as declared by a composite widget.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PanelManifest {
    pub id: String,
    #[serde(alias = "sourceLocation", alias = "viewUrl")]
    pub source_location: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, alias = "structuredContent")]
    pub structured_content: Value,
}

impl PanelManifest {
    pub fn envelope(&self) -> Envelope {
        Envelope::tool_result(self.structured_content.clone())
    }
}

/// Creates the frame for a panel (iframe, socket, loopback...).
#[async_trait]
pub trait FrameMounter: Send + Sync {
    async fn mount(&self, panel: &PanelManifest) -> Result<FramePort>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// One mounted panel at a time.
    Tabs { active: Option<String> },
    /// Every panel mounted.
    Split,
}

pub struct CompositeView<M> {
    bus: RelayBus,
    mounter: M,
    panels: Vec<PanelManifest>,
    layout: Layout,
}

impl<M: FrameMounter> CompositeView<M> {
    pub fn tabs(bus: RelayBus, mounter: M, panels: Vec<PanelManifest>, active: Option<String>) -> Self {
        Self {
            bus,
            mounter,
            panels,
            layout: Layout::Tabs { active },
        }
    }

    pub fn split(bus: RelayBus, mounter: M, panels: Vec<PanelManifest>) -> Self {
        Self {
            bus,
            mounter,
            panels,
            layout: Layout::Split,
        }
    }

    /// Cache every panel's payload, then mount what the layout shows.
    pub async fn open(&mut self) -> Result<()> {
        for p in &self.panels {
            self.bus.deliver(&p.id, p.envelope());
        }

        match &self.layout {
            Layout::Tabs { active } => {
                let first = active
                    .clone()
                    .filter(|id| self.panel(id).is_some())
                    .or_else(|| self.panels.first().map(|p| p.id.clone()));
                if let Some(id) = first {
                    self.mount(&id).await?;
                    self.layout = Layout::Tabs { active: Some(id) };
                }
            }
            Layout::Split => {
                let ids: Vec<String> = self.panels.iter().map(|p| p.id.clone()).collect();
                for id in ids {
                    self.mount(&id).await?;
                }
            }
        }
        Ok(())
    }

    /// Switch tabs: the current tab's frame is destroyed, the target's created.
    ///
    /// If the target fails to mount, the previous tab is mounted again and
    /// stays active; if that fails too, no tab is active and the mount error
    /// is returned.
    pub async fn select(&mut self, id: &str) -> Result<()> {
        let Layout::Tabs { active } = &self.layout else {
            return Err(ViewLinkError::BadRequest("select requires a tabs layout".into()));
        };
        if self.panel(id).is_none() {
            return Err(ViewLinkError::BadRequest(format!("unknown tab: {id}")));
        }
        if active.as_deref() == Some(id) {
            return Ok(());
        }

        let previous = active.clone();
        if let Some(current) = &previous {
            self.unmount(current);
        }
        self.layout = Layout::Tabs { active: None };

        if let Err(e) = self.mount(id).await {
            tracing::warn!(tab = %id, error = %e, "tab mount failed");
            if let Some(prev) = previous {
                match self.mount(&prev).await {
                    Ok(()) => self.layout = Layout::Tabs { active: Some(prev) },
                    Err(e) => tracing::warn!(tab = %prev, error = %e, "previous tab could not be restored"),
                }
            }
            return Err(e);
        }
        self.layout = Layout::Tabs {
            active: Some(id.to_string()),
        };
        Ok(())
    }

    /// Create a frame for panel `id` and register it.
    pub async fn mount(&mut self, id: &str) -> Result<()> {
        let panel = self
            .panel(id)
            .cloned()
            .ok_or_else(|| ViewLinkError::BadRequest(format!("unknown panel: {id}")))?;
        let port = self.mounter.mount(&panel).await?;
        self.bus.register(panel.id, port);
        Ok(())
    }

    pub fn unmount(&mut self, id: &str) -> bool {
        self.bus.unregister(id)
    }

    /// Host data for panel `id` changed.
    pub fn update(&mut self, id: &str, structured_content: Value) -> Routed {
        if let Some(p) = self.panels.iter_mut().find(|p| p.id == id) {
            p.structured_content = structured_content.clone();
        }
        self.bus.deliver(id, Envelope::tool_result(structured_content))
    }

    pub fn active(&self) -> Option<&str> {
        match &self.layout {
            Layout::Tabs { active } => active.as_deref(),
            Layout::Split => None,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn panels(&self) -> &[PanelManifest] {
        &self.panels
    }

    pub fn bus(&self) -> &RelayBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut RelayBus {
        &mut self.bus
    }

    /// See `RelayBus::set_link_filter`.
    pub fn set_link_filter<F>(&mut self, filter: F)
    where
        F: Fn(&ViewMessage, &str, &str) -> bool + Send + Sync + 'static,
    {
        self.bus.set_link_filter(filter);
    }

    fn panel(&self, id: &str) -> Option<&PanelManifest> {
        self.panels.iter().find(|p| p.id == id)
    }
}
