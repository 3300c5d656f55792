pub mod api_registry;
