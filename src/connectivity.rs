//! Online/offline state and the reachability probe that drives it.

use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};
use url::Url;

use crate::event::Event;
use crate::http::{Fetcher, Request};

/// A change of connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
  WentOnline,
  WentOffline,
}

/// Current connectivity, observable through [`ConnectivityMonitor::subscribe`].
pub struct ConnectivityMonitor {
  tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Record the latest signal. Returns the transition only when the state flips.
  pub fn set_online(&self, online: bool) -> Option<Transition> {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        return false;
      }
      *current = online;
      true
    });

    if !changed {
      return None;
    }

    if online {
      info!("connectivity restored");
      Some(Transition::WentOnline)
    } else {
      info!("connectivity lost");
      Some(Transition::WentOffline)
    }
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

/// Decides reachability with a HEAD request. Any HTTP response, whatever its
/// status, counts as online.
#[derive(Clone)]
pub struct ReachabilityProbe {
  network: Arc<dyn Fetcher>,
  url: Url,
}

impl ReachabilityProbe {
  pub fn new(network: Arc<dyn Fetcher>, url: Url) -> Self {
    Self { network, url }
  }

  pub async fn check(&self) -> bool {
    let request = Request::new(Method::HEAD, self.url.clone());
    match self.network.fetch(&request).await {
      Ok(response) => {
        debug!(url = %self.url, status = response.status, "probe reached host");
        true
      }
      Err(e) => {
        debug!(url = %self.url, error = %e, "probe failed");
        false
      }
    }
  }

  /// Poll every `interval`, sending an event only when the result differs
  /// from the last one. Stops once the receiver is gone.
  pub fn spawn(
    self,
    interval: Duration,
    initial: bool,
    tx: mpsc::UnboundedSender<Event>,
  ) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
      let mut last = initial;
      let mut ticker = tokio::time::interval(interval);
      // The first tick fires immediately and `initial` already covers it
      ticker.tick().await;

      loop {
        ticker.tick().await;
        let online = self.check().await;
        if online == last {
          continue;
        }
        last = online;
        if tx.send(Event::Connectivity(online)).is_err() {
          break;
        }
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::testing::FakeFetcher;

  #[test]
  fn test_only_flips_are_transitions() {
    let monitor = ConnectivityMonitor::new(false);
    assert!(!monitor.is_online());

    assert_eq!(monitor.set_online(false), None);
    assert_eq!(monitor.set_online(true), Some(Transition::WentOnline));
    assert_eq!(monitor.set_online(true), None);
    assert_eq!(monitor.set_online(false), Some(Transition::WentOffline));
    assert!(!monitor.is_online());
  }

  #[tokio::test]
  async fn test_subscribers_see_changes() {
    let monitor = ConnectivityMonitor::new(true);
    let mut rx = monitor.subscribe();

    monitor.set_online(false);
    rx.changed().await.unwrap();
    assert!(!*rx.borrow());
  }

  #[tokio::test]
  async fn test_probe_treats_any_response_as_online() {
    let network = Arc::new(FakeFetcher::new());
    let url = Url::parse("https://org.crm4.dynamics.com/").unwrap();
    let probe = ReachabilityProbe::new(network.clone(), url.clone());

    // Unknown routes answer 404, which still proves reachability
    assert!(probe.check().await);

    network.set_offline(true);
    assert!(!probe.check().await);

    let requests = network.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, Method::HEAD);
    assert_eq!(requests[0].url, url);
  }

  #[tokio::test]
  async fn test_spawned_probe_reports_changes_only() {
    let network = Arc::new(FakeFetcher::new());
    let url = Url::parse("https://org.crm4.dynamics.com/").unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let task =
      ReachabilityProbe::new(network.clone(), url).spawn(Duration::from_millis(10), true, tx);

    network.set_offline(true);
    match rx.recv().await {
      Some(Event::Connectivity(online)) => assert!(!online),
      other => panic!("unexpected event: {:?}", other),
    }

    network.set_offline(false);
    match rx.recv().await {
      Some(Event::Connectivity(online)) => assert!(online),
      other => panic!("unexpected event: {:?}", other),
    }

    task.abort();
  }
}
