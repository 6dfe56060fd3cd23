pub mod charm;
pub mod settings;
