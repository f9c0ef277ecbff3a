//! Integration test suite.

mod mock_transport;
mod pipeline;
