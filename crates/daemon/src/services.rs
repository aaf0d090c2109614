//! Construction of the long-lived service graph.

use std::sync::Arc;
use std::time::Duration;

use pixoo_core::file_tracker::FileTracker;
use pixoo_core::upload_store::{UploadData, UploadStore};
use pixoo_device::http::HttpTransport;
use pixoo_device::last_ip::LastIpStore;
use pixoo_device::mdns::MdnsBrowser;
use pixoo_device::reconnect::ReconnectConfig;
use pixoo_device::text::TextSender;
use pixoo_device::{
    ConnectionConfig, DeviceConnection, DeviceDiscovery, DiscoveryConfig, FrameUploader,
};
use pixoo_rotation::{MetadataGallery, RotationScheduler, RotationStore, SchedulerConfig};

use crate::config::DaemonConfig;
use crate::ingest::UploadIngest;

/// Every shared service, built once at startup.
pub struct Services {
    pub connection: Arc<DeviceConnection>,
    pub discovery: Arc<DeviceDiscovery>,
    pub uploader: Arc<FrameUploader>,
    pub text: Arc<TextSender>,
    pub scheduler: Arc<RotationScheduler>,
    pub files: Arc<FileTracker>,
    pub uploads: Arc<UploadStore<UploadData>>,
    pub ingest: Arc<UploadIngest>,
    pub reconnect: ReconnectConfig,
}

impl Services {
    pub fn build(config: &DaemonConfig) -> Self {
        let transport = Arc::new(HttpTransport::new());
        let last_ip = LastIpStore::in_dir(&config.data_dir);

        let connection = Arc::new(
            DeviceConnection::new(
                transport.clone(),
                ConnectionConfig {
                    command_timeout: config.command_timeout,
                    ..Default::default()
                },
            )
            .with_last_ip_store(last_ip.clone()),
        );

        let discovery = Arc::new(
            DeviceDiscovery::new(transport, DiscoveryConfig::default())
                .with_browser(Arc::new(MdnsBrowser::new()))
                .with_last_ip_store(last_ip),
        );

        let uploader = Arc::new(FrameUploader::new(Arc::clone(&connection)));
        let text = Arc::new(TextSender::new(Arc::clone(&uploader)));

        let scheduler = Arc::new(RotationScheduler::new(
            Arc::new(MetadataGallery::new(&config.gallery_dir)),
            uploader.clone(),
            RotationStore::in_dir(&config.data_dir),
            SchedulerConfig::default(),
        ));

        let files = Arc::new(FileTracker::new());
        let uploads = Arc::new(UploadStore::new(
            "uploads",
            config.upload_ttl,
            Arc::clone(&files),
        ));
        let ingest = Arc::new(UploadIngest::new(
            &config.temp_dir,
            Arc::clone(&uploads),
            Arc::clone(&files),
            Arc::clone(&uploader),
        ));

        Self {
            connection,
            discovery,
            uploader,
            text,
            scheduler,
            files,
            uploads,
            ingest,
            reconnect: ReconnectConfig {
                discovery_window: config.discovery_timeout,
                ..Default::default()
            },
        }
    }

    /// Connect to the configured address, or to the first discovered device.
    /// Returns whether a connection was made.
    pub async fn connect_initial(&self, config: &DaemonConfig) -> bool {
        let candidates = match config.device_ip {
            Some(ip) => vec![ip],
            None => self.discovery.discover(config.discovery_timeout).await,
        };

        if candidates.is_empty() {
            tracing::warn!("No device found on the network");
            return false;
        }

        for ip in candidates {
            match self.connection.connect(&ip.to_string()).await {
                Ok(()) => return true,
                Err(e) => tracing::warn!(ip = %ip, error = %e, "Could not connect to device"),
            }
        }
        false
    }

    /// Stop background activity that touches the device.
    pub async fn shutdown(&self, grace: Duration) {
        self.scheduler.shutdown().await;
        let cleared = self.uploads.clear();
        if cleared > 0 {
            tracing::info!(cleared, "Discarded staged uploads");
        }
        if tokio::time::timeout(grace, self.connection.disconnect()).await.is_err() {
            tracing::warn!("Timed out closing device connection");
        }
    }
}
