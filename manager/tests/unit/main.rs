mod common;
mod test_deployment_store;
mod test_reconciler;
mod test_server;
