pub mod image_attachments;
